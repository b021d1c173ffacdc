//! Error types for the migrator application, consolidating configuration,
//! schema, store, and pipeline errors into one top-level type.
use migrator_pipeline::MigrationError;
use migrator_repository::StoreError;
use migrator_shared::SchemaError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum MigratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}
