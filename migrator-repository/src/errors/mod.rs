//! Error types for store access.
//! Consolidates the error conditions the PostgreSQL and MySQL stores can
//! surface during catalog queries, streamed reads, and bulk writes.
use thiserror::Error;

/// Represents errors that can occur while talking to a source or
/// destination store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unsupported column type '{type_name}' for column '{column}'")]
    UnsupportedType { column: String, type_name: String },

    #[error("Column '{column}' missing from streamed row")]
    MissingColumn { column: String },

    #[error("Entity type {0} has no primary key field")]
    MissingPrimaryKey(String),

    #[error("Unsupported connection URL scheme in '{0}' (expected postgres:// or mysql://)")]
    UnsupportedScheme(String),
}
