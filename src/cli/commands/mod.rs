pub mod access;
pub mod config;
pub mod health;
pub mod migrate;
pub mod record;
pub mod tenant;
pub mod user;
