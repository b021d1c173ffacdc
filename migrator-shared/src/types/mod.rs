//! Core data types for the migrator.
mod entity;
mod record;
mod value;

pub use entity::{EntityType, EntityTypeId, FieldSpec, ParseEntityTypeIdError};
pub use record::Record;
pub use value::SqlValue;
