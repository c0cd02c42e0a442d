// Guard Error Types
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::ConfigError;
use crate::database::migrations::MigrationError;
use crate::filter::error::FilterError;

/// Typed failures surfaced by every guard operation.
///
/// Nothing in this crate swallows a database error and carries on: schema
/// drift aborts with `Constraint`, and a failed begin/commit aborts with
/// `Transaction` after the whole unit of work has been rolled back.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already deleted: {0}")]
    AlreadyDeleted(String),

    #[error("Not deleted: {0}")]
    NotDeleted(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl GuardError {
    /// HTTP status code the API layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::NotFound(_) => 404,
            GuardError::AlreadyDeleted(_) => 409,
            GuardError::NotDeleted(_) => 409,
            GuardError::Constraint(_) => 500,
            GuardError::Transaction(_) => 500,
            GuardError::Forbidden(_) => 403,
            GuardError::Validation(_) => 400,
            GuardError::InvalidIdentifier(_) => 400,
            GuardError::Filter(_) => 400,
            GuardError::Migration(_) => 503,
            GuardError::Config(_) => 500,
            GuardError::Database(_) => 500,
        }
    }

    /// Stable error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            GuardError::NotFound(_) => "NOT_FOUND",
            GuardError::AlreadyDeleted(_) => "ALREADY_DELETED",
            GuardError::NotDeleted(_) => "NOT_DELETED",
            GuardError::Constraint(_) => "CONSTRAINT_ERROR",
            GuardError::Transaction(_) => "TRANSACTION_ERROR",
            GuardError::Forbidden(_) => "FORBIDDEN",
            GuardError::Validation(_) => "VALIDATION_ERROR",
            GuardError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            GuardError::Filter(_) => "INVALID_FILTER",
            GuardError::Migration(_) => "MIGRATION_ERROR",
            GuardError::Config(_) => "CONFIG_ERROR",
            GuardError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Convert to JSON response body. Internal SQL details are logged, not exposed.
    pub fn to_json(&self) -> Value {
        let message = match self {
            GuardError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error occurred".to_string()
            }
            GuardError::Transaction(msg) => {
                tracing::error!("Transaction error: {}", msg);
                "The operation was rolled back".to_string()
            }
            other => other.to_string(),
        };

        json!({
            "error": true,
            "message": message,
            "code": self.error_code()
        })
    }
}

// Postgres SQLSTATE classes that indicate the schema or a constraint said no
const SQLSTATE_CHECK_VIOLATION: &str = "23514";
const SQLSTATE_FOREIGN_KEY_VIOLATION: &str = "23503";
const SQLSTATE_NOT_NULL_VIOLATION: &str = "23502";
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
const SQLSTATE_UNDEFINED_COLUMN: &str = "42703";
const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";
const SQLSTATE_RAISE_EXCEPTION: &str = "P0001";

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        let rejected = match &err {
            sqlx::Error::RowNotFound => return GuardError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                match code.as_deref() {
                    Some(SQLSTATE_CHECK_VIOLATION)
                    | Some(SQLSTATE_FOREIGN_KEY_VIOLATION)
                    | Some(SQLSTATE_NOT_NULL_VIOLATION)
                    | Some(SQLSTATE_UNIQUE_VIOLATION)
                    | Some(SQLSTATE_UNDEFINED_COLUMN)
                    | Some(SQLSTATE_UNDEFINED_TABLE)
                    | Some(SQLSTATE_RAISE_EXCEPTION) => Some(db_err.message().to_string()),
                    _ => None,
                }
            }
            _ => None,
        };
        match rejected {
            Some(message) => GuardError::Constraint(message),
            None => GuardError::Database(err),
        }
    }
}

impl From<crate::database::manager::DatabaseError> for GuardError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        match err {
            crate::database::manager::DatabaseError::Sqlx(e) => e.into(),
            other => GuardError::Config(ConfigError::Invalid(other.to_string())),
        }
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
