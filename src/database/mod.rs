pub mod manager;
pub mod migrations;
pub mod models;
pub mod schema;

pub use manager::{DatabaseError, DatabaseManager};
pub use migrations::{MigrationRunner, MigrationStatus};
