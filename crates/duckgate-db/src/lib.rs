//! Pooled, concurrency-safe access to an embedded analytical database.
//!
//! The entry point is [`Manager`], which owns two connection pools (the
//! main database and the file-backed credential store), a schema cache,
//! and a canonical-statement cache. Row mutations run in explicit
//! transactions with automatic retry on optimistic write-write conflicts;
//! reads translate structured filter and sort terms into fully
//! parameterized SQL. Every call is bounded by a per-call watchdog that
//! interrupts the engine when the configured timeout elapses.

pub mod error;
pub mod filter;
pub mod manager;
pub mod operations;
pub mod schema_cache;
pub mod statement_cache;

pub use error::{DbError, Result};
pub use filter::{
    order_by_clause, where_clause, Filter, FilterError, FilterOp, FilterValue, Sort, SortDirection,
};
pub use manager::Manager;
pub use operations::RowMap;
pub use schema_cache::SchemaCache;
pub use statement_cache::{CachedStatement, StatementCache, StatementKind};

// Callers build parameter values and consume cursors in terms of the
// engine's own types.
pub use duckdb::types::Value;
pub use duckdb::{Row, Rows};
