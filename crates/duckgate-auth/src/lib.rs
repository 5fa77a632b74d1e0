//! API-key authentication and role-based, per-table authorization.
//!
//! [`Authorizer`] sits in front of the credential store's pool: callers
//! authenticate a key, then ask whether its role may perform an operation
//! on a table. Both answers are cached with a TTL; administrative
//! mutations purge the affected cache immediately.

pub mod authorizer;
pub mod error;

pub use authorizer::{Authorizer, PermissionFlags};
pub use error::{AuthError, Result};

pub use duckgate_commons::{ApiKey, Operation, Permission, Role};
