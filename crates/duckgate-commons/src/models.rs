//! Auth data model shared between the authorizer and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A role in the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_name: String,
    pub description: String,
}

/// An API key record.
///
/// Revocation flips `is_active` rather than deleting the row, so revoked
/// keys stay auditable in the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub role_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ApiKey {
    /// Whether the key's expiration, if any, has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at < now)
    }
}

/// Per-operation permission flags for a role on one table.
///
/// `table_name` may be the wildcard `"*"`; an exact-table row always takes
/// precedence over the wildcard row when both exist for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: i64,
    pub role_name: String,
    pub table_name: String,
    pub can_create: bool,
    pub can_read: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub can_query: bool,
}

impl Permission {
    /// Resolve one operation against this record's flags.
    pub fn allows(&self, operation: Operation) -> bool {
        match operation {
            Operation::Create => self.can_create,
            Operation::Read => self.can_read,
            Operation::Update => self.can_update,
            Operation::Delete => self.can_delete,
            Operation::Query => self.can_query,
        }
    }
}

/// A database operation subject to permission checks.
///
/// `Query` gates raw-SQL access and is distinct from the row-level CRUD
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Query,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Query => "query",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for operation strings outside the closed set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown operation '{0}' (supported: create, read, update, delete, query)")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "read" => Ok(Operation::Read),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            "query" => Ok(Operation::Query),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}
