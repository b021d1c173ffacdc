//! # Migrator Shared
//! Domain types shared across the batch data migrator: entity-type metadata,
//! dynamic SQL values, records, and the TOML-declared schema registry.
pub mod schema;
pub mod types;

pub use schema::{SchemaError, SchemaRegistry};
pub use types::{EntityType, EntityTypeId, FieldSpec, ParseEntityTypeIdError, Record, SqlValue};
