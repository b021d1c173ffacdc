//! Errors raised while copying one entity type.
use migrator_repository::StoreError;
use migrator_shared::EntityTypeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("entity type {0} has no primary key field")]
    MissingPrimaryKey(EntityTypeId),

    #[error("entity type {entity}: streamed row is missing primary key column '{column}'")]
    RowMissingPrimaryKey {
        entity: EntityTypeId,
        column: String,
    },
}
