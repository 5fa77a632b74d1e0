use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Error type for authentication and authorization.
///
/// `InvalidApiKey` deliberately covers both unknown and inactive keys so
/// responses do not reveal which of the two a caller hit.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API key has expired")]
    ApiKeyExpired,

    #[error("API key not found")]
    ApiKeyNotFound,

    #[error("Role '{0}' not found")]
    RoleNotFound(String),

    #[error("No permission entry for role '{role}' on table '{table}'")]
    PermissionNotFound { role: String, table: String },

    #[error(transparent)]
    Identifier(#[from] duckgate_commons::InvalidIdentifier),

    #[error("Credential store error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}
