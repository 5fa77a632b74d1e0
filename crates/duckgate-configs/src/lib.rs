//! duckgate-configs
//!
//! Configuration types and loader for duckgate.

pub mod config;

pub use config::defaults;
pub use config::*;
