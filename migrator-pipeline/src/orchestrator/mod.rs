//! Runs a whole migration: plan, validate, then copy entity types one at
//! a time in dependency order.
use std::collections::HashMap;
use std::time::Instant;

use migrator_repository::{DestinationStore, SourceStore};
use migrator_shared::EntityTypeId;
use tracing::info;

use crate::copier::{BatchCopier, CopyStats};
use crate::errors::MigrationError;
use crate::planner::{MigrationPlanner, SkipReason};
use crate::validate::build_field_mappings;

/// What a completed run did, per entity type and in total.
#[derive(Debug)]
pub struct RunSummary {
    /// Copy outcomes in migration order.
    pub copied: Vec<(EntityTypeId, CopyStats)>,
    /// Entity types that were planned but ineligible.
    pub skipped: Vec<(EntityTypeId, SkipReason)>,
    pub total_records: u64,
}

/// Drives one migration run end to end. Holds no connection state of its
/// own; the stores are passed in per run.
pub struct Orchestrator {
    planner: MigrationPlanner,
    copier: BatchCopier,
}

impl Orchestrator {
    pub fn new(planner: MigrationPlanner, copier: BatchCopier) -> Self {
        Self { planner, copier }
    }

    pub async fn run(
        &self,
        source: &dyn SourceStore,
        destination: &dyn DestinationStore,
    ) -> Result<RunSummary, MigrationError> {
        let started = Instant::now();

        let plan = self.planner.plan(source).await?;
        plan.log();

        let mappings = build_field_mappings(&plan, source, destination).await?;

        let mut copied = Vec::with_capacity(plan.ordered.len());
        let mut total_records = 0u64;

        for entity in &plan.ordered {
            info!("Migrating {}...", entity.id);
            let mapping = mappings
                .get(&entity.id)
                .ok_or_else(|| MigrationError::MissingMapping(entity.id.clone()))?;
            let stats = self
                .copier
                .copy_entity(entity, mapping, source, destination)
                .await?;
            info!(
                "Completed {}: {} records in {:.1}s ({:.0} records/s)",
                entity.id,
                stats.records,
                stats.elapsed.as_secs_f64(),
                stats.throughput()
            );
            total_records += stats.records;
            copied.push((entity.id.clone(), stats));
        }

        info!(
            "Migration finished: {total_records} records across {} entity types in {:.1}s",
            copied.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(RunSummary {
            copied,
            skipped: plan.skipped.clone(),
            total_records,
        })
    }
}
