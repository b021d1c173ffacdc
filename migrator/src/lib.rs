//! Batch Data Migrator
//!
//! Binary crate wiring: run configuration, schema loading, store
//! connection, and the top-level error type.
pub mod config;
pub mod errors;

pub use config::{Dependencies, RunConfig};
pub use errors::MigratorError;
