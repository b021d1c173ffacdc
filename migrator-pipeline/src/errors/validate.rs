//! Errors raised by startup field-mapping validation.
use migrator_shared::EntityTypeId;
use migrator_repository::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    /// Declared field has no matching destination column: schema drift the
    /// copy would only discover mid-run otherwise.
    #[error("entity type {entity}: declared field '{column}' does not exist on the destination table '{table}'")]
    DestinationMissingColumn {
        entity: EntityTypeId,
        table: String,
        column: String,
    },

    #[error("Catalog error: {0}")]
    Store(#[from] StoreError),
}
