pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod guard;
pub mod services;

pub use error::{GuardError, GuardResult};
pub use guard::Guard;
