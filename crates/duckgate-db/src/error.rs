use std::time::Duration;
use thiserror::Error;

use crate::filter::FilterError;

pub type Result<T> = std::result::Result<T, DbError>;

/// Error type for the data-access layer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] duckdb::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential store validation failed: {0}")]
    SchemaValidation(String),

    #[error("Table '{0}' has no columns or does not exist")]
    TableNotFound(String),

    #[error("No data provided for insert")]
    EmptyInsert,

    #[error("No columns provided for update")]
    EmptySet,

    #[error("No where clause provided for {0} (refusing unconditional mutation)")]
    EmptyWhere(&'static str),

    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Identifier(#[from] duckgate_commons::InvalidIdentifier),

    #[error("Transaction failed after {attempts} attempts: {last_error}")]
    ConflictRetriesExhausted { attempts: u32, last_error: String },

    #[error("Call exceeded the {}ms timeout and was interrupted", timeout.as_millis())]
    Timeout { timeout: Duration },
}

/// Wrap an engine error, surfacing watchdog interrupts as timeouts.
pub(crate) fn map_engine_error(err: duckdb::Error, timeout: Duration) -> DbError {
    if err.to_string().to_lowercase().contains("interrupt") {
        DbError::Timeout { timeout }
    } else {
        DbError::Engine(err)
    }
}
