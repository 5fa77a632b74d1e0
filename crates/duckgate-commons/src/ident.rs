//! Identifier allow-list validation.
//!
//! Table and column names appear verbatim in generated SQL (the engine does
//! not parameterize identifiers), so every caller-supplied identifier must
//! pass this check before it reaches the SQL-building layers. Those layers
//! trust their inputs and focus on value parameterization.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid identifier '{0}': must be non-empty and contain only alphanumeric characters and underscores")]
pub struct InvalidIdentifier(pub String);

/// Validate a table or column name against the strict allow-list:
/// non-empty, ASCII alphanumeric and underscore only.
pub fn validate_identifier(name: &str) -> Result<(), InvalidIdentifier> {
    if name.is_empty() {
        return Err(InvalidIdentifier(name.to_string()));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(InvalidIdentifier(name.to_string()));
    }
    Ok(())
}
