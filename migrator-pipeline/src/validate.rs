//! Startup field-mapping validation.
//!
//! Before any record moves, every eligible entity type's declared fields
//! are checked against the live catalogs of both stores. Destination drift
//! is fatal; a field missing on the source is dropped from the copy list
//! and the destination default applies.
use std::collections::{HashMap, HashSet};

use migrator_repository::{DestinationStore, SourceStore};
use migrator_shared::{EntityType, EntityTypeId};
use tracing::warn;

use crate::errors::ValidationError;
use crate::planner::MigrationPlan;

/// Columns actually copied for one entity type, in declaration order.
/// Deferred fields are included; the copier separates the passes.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub columns: Vec<String>,
}

impl FieldMapping {
    /// Columns for the bulk pass (deferred fields excluded).
    pub fn eager_columns(&self, entity: &EntityType) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| entity.field(c).map(|f| !f.deferred).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Deferred columns that survived validation.
    pub fn deferred_columns(&self, entity: &EntityType) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| entity.field(c).map(|f| f.deferred).unwrap_or(false))
            .cloned()
            .collect()
    }
}

/// Validate every planned entity type against both catalogs and produce
/// its copy list.
pub async fn build_field_mappings(
    plan: &MigrationPlan,
    source: &dyn SourceStore,
    destination: &dyn DestinationStore,
) -> Result<HashMap<EntityTypeId, FieldMapping>, ValidationError> {
    let mut mappings = HashMap::new();

    for entity in &plan.ordered {
        let source_columns: HashSet<String> =
            source.column_names(&entity.table).await?.into_iter().collect();
        let destination_columns: HashSet<String> = destination
            .column_names(&entity.table)
            .await?
            .into_iter()
            .collect();

        let mut columns = Vec::with_capacity(entity.fields.len());
        for field in &entity.fields {
            if !destination_columns.contains(&field.name) {
                return Err(ValidationError::DestinationMissingColumn {
                    entity: entity.id.clone(),
                    table: entity.table.clone(),
                    column: field.name.clone(),
                });
            }
            if !source_columns.contains(&field.name) {
                warn!(
                    "{}: field '{}' missing on source table '{}', destination default applies",
                    entity.id, field.name, entity.table
                );
                continue;
            }
            columns.push(field.name.clone());
        }
        mappings.insert(entity.id.clone(), FieldMapping { columns });
    }

    Ok(mappings)
}
