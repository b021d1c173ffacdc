//! Top-level error for a migration run, consolidating the stage errors.
use migrator_shared::EntityTypeId;
use thiserror::Error;

use super::{CopyError, PlanError, ValidationError};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Copy error: {0}")]
    Copy(#[from] CopyError),

    #[error("no field mapping computed for entity type {0}")]
    MissingMapping(EntityTypeId),
}
