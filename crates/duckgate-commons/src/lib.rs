//! Shared models and validation helpers for duckgate.
//!
//! This crate carries the types that cross crate boundaries: the auth data
//! model (roles, API keys, permissions, operations) and the identifier
//! allow-list check upstream callers must apply before table or column
//! names reach the SQL-building layers.

pub mod ident;
pub mod models;

pub use ident::{validate_identifier, InvalidIdentifier};
pub use models::{ApiKey, Operation, Permission, Role, UnknownOperation};
