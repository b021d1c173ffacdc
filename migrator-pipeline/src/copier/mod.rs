//! Batch copier: streams one entity type's records from the source and
//! bulk-writes them to the destination inside a single transaction, with
//! conflict-skipping inserts and an optional deferred-field second pass.
mod progress;

use std::time::{Duration, Instant};

use futures::TryStreamExt;
use migrator_repository::{CopyTransaction, DestinationStore, SourceStore};
use migrator_shared::{EntityType, SqlValue};
use tracing::{info, warn};

use crate::errors::CopyError;
use crate::validate::FieldMapping;

pub use progress::ProgressReporter;

/// Default buffer flush threshold.
pub const DEFAULT_BATCH_SIZE: usize = 5000;
/// Hard cap on the per-statement batch in the bulk pass.
pub const STATEMENT_BATCH_CAP: usize = 5000;
/// Field count above which the statement batch is doubled to amortize
/// per-statement overhead for wide rows.
pub const WIDE_ROW_FIELD_THRESHOLD: usize = 10;
/// Chunk and batch size for the bulk pass of deferred-field entity types.
pub const DEFERRED_PASS_BATCH_SIZE: usize = 10000;
/// Deferred pass logs every this many processed records.
pub const DEFERRED_PROGRESS_INTERVAL: u64 = 1000;

/// Per-statement batch for the bulk write: doubled for wide rows, capped.
pub fn statement_batch_size(batch_size: usize, field_count: usize) -> usize {
    let widened = if field_count > WIDE_ROW_FIELD_THRESHOLD {
        batch_size * 2
    } else {
        batch_size
    };
    widened.min(STATEMENT_BATCH_CAP)
}

/// Outcome of one entity type's copy.
#[derive(Debug, Clone)]
pub struct CopyStats {
    pub records: u64,
    pub batches: u64,
    pub deferred_updates: u64,
    pub elapsed: Duration,
}

impl CopyStats {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records as f64 / secs
        } else {
            0.0
        }
    }
}

/// Copies one entity type at a time, sequentially, to completion.
pub struct BatchCopier {
    batch_size: usize,
}

impl BatchCopier {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// Copy all records of `entity`, choosing the plain or two-pass path
    /// based on the entity's deferred-field flags.
    pub async fn copy_entity(
        &self,
        entity: &EntityType,
        mapping: &FieldMapping,
        source: &dyn SourceStore,
        destination: &dyn DestinationStore,
    ) -> Result<CopyStats, CopyError> {
        if entity.has_deferred_fields() {
            self.copy_with_deferred(entity, mapping, source, destination)
                .await
        } else {
            self.copy_plain(entity, mapping, source, destination).await
        }
    }

    async fn copy_plain(
        &self,
        entity: &EntityType,
        mapping: &FieldMapping,
        source: &dyn SourceStore,
        destination: &dyn DestinationStore,
    ) -> Result<CopyStats, CopyError> {
        let started = Instant::now();
        let estimated = self.estimate(entity, source).await?;

        let columns = mapping.columns.clone();
        let statement_batch = statement_batch_size(self.batch_size, entity.fields.len());
        let (records, batches) = self
            .copy_bulk(
                entity,
                &columns,
                self.batch_size,
                statement_batch,
                estimated,
                source,
                destination,
            )
            .await?;

        self.fix_sequence(entity, destination).await?;

        let stats = CopyStats {
            records,
            batches,
            deferred_updates: 0,
            elapsed: started.elapsed(),
        };
        Ok(stats)
    }

    async fn copy_with_deferred(
        &self,
        entity: &EntityType,
        mapping: &FieldMapping,
        source: &dyn SourceStore,
        destination: &dyn DestinationStore,
    ) -> Result<CopyStats, CopyError> {
        let started = Instant::now();
        let estimated = self.estimate(entity, source).await?;

        // pass 1: everything except the deferred columns, larger batches
        let columns = mapping.eager_columns(entity);
        let (records, batches) = self
            .copy_bulk(
                entity,
                &columns,
                DEFERRED_PASS_BATCH_SIZE,
                DEFERRED_PASS_BATCH_SIZE,
                estimated,
                source,
                destination,
            )
            .await?;

        // pass 2: deferred columns for records that actually carry them
        let deferred_updates = self
            .copy_deferred_fields(entity, mapping, source, destination)
            .await?;

        self.fix_sequence(entity, destination).await?;

        Ok(CopyStats {
            records,
            batches,
            deferred_updates,
            elapsed: started.elapsed(),
        })
    }

    async fn estimate(
        &self,
        entity: &EntityType,
        source: &dyn SourceStore,
    ) -> Result<u64, CopyError> {
        info!("Estimating record count for {}...", entity.id);
        let estimated = source.estimate_count(&entity.table).await?;
        info!("Found approximately {estimated} records to migrate");
        Ok(estimated)
    }

    /// The transactional bulk write: suspend constraints, stream and flush,
    /// restore constraints, commit. On failure the constraints are restored
    /// and the transaction rolled back before the error propagates.
    #[allow(clippy::too_many_arguments)]
    async fn copy_bulk(
        &self,
        entity: &EntityType,
        columns: &[String],
        flush_size: usize,
        statement_batch: usize,
        estimated: u64,
        source: &dyn SourceStore,
        destination: &dyn DestinationStore,
    ) -> Result<(u64, u64), CopyError> {
        let mut tx = destination.begin_copy().await?;
        tx.suspend_constraints().await?;

        let result = self
            .stream_into(
                entity,
                columns,
                flush_size,
                statement_batch,
                estimated,
                source,
                tx.as_mut(),
            )
            .await;

        match result {
            Ok(counts) => {
                tx.restore_constraints().await?;
                tx.commit().await?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(restore_err) = tx.restore_constraints().await {
                    warn!("Failed to restore constraint enforcement: {restore_err}");
                }
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Failed to roll back copy transaction: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_into(
        &self,
        entity: &EntityType,
        columns: &[String],
        flush_size: usize,
        statement_batch: usize,
        estimated: u64,
        source: &dyn SourceStore,
        tx: &mut dyn CopyTransaction,
    ) -> Result<(u64, u64), CopyError> {
        let mut stream = source.stream_records(entity, columns);
        let mut buffer = Vec::with_capacity(flush_size);
        let mut progress = ProgressReporter::new(estimated);
        let mut total = 0u64;
        let mut batches = 0u64;

        while let Some(record) = stream.try_next().await? {
            buffer.push(record);
            if buffer.len() >= flush_size {
                tx.insert_ignore(entity, columns, &buffer, statement_batch)
                    .await?;
                total += buffer.len() as u64;
                batches += 1;
                buffer.clear();
                if let Some(percent) = progress.update(total) {
                    info!(
                        "Batch {batches} completed: {total}/{estimated} records migrated ({percent:.1}%)"
                    );
                }
            }
        }

        if !buffer.is_empty() {
            tx.insert_ignore(entity, columns, &buffer, statement_batch)
                .await?;
            total += buffer.len() as u64;
            batches += 1;
        }

        Ok((total, batches))
    }

    /// Second pass for deferred fields: update already-written destination
    /// records by primary key, skipping records that never made it across.
    async fn copy_deferred_fields(
        &self,
        entity: &EntityType,
        mapping: &FieldMapping,
        source: &dyn SourceStore,
        destination: &dyn DestinationStore,
    ) -> Result<u64, CopyError> {
        let deferred = mapping.deferred_columns(entity);
        if deferred.is_empty() {
            return Ok(0);
        }
        info!("Starting deferred field migration...");
        let pk = entity
            .primary_key()
            .ok_or_else(|| CopyError::MissingPrimaryKey(entity.id.clone()))?;

        let mut stream = source.stream_deferred_candidates(entity, &deferred);
        let mut processed = 0u64;

        while let Some(record) = stream.try_next().await? {
            let pk_value = record
                .get(&pk.name)
                .ok_or_else(|| CopyError::RowMissingPrimaryKey {
                    entity: entity.id.clone(),
                    column: pk.name.clone(),
                })?;

            let updates: Vec<(String, SqlValue)> = deferred
                .iter()
                .filter_map(|column| {
                    record
                        .get(column)
                        .filter(|value| !value.is_empty())
                        .map(|value| (column.clone(), value.clone()))
                })
                .collect();
            if updates.is_empty() {
                continue;
            }

            if destination.update_deferred(entity, pk_value, &updates).await? {
                processed += 1;
                if processed % DEFERRED_PROGRESS_INTERVAL == 0 {
                    info!("Processed {processed} deferred records");
                }
            } else {
                warn!(
                    "{} record {pk_value} not found in destination, skipping deferred fields",
                    entity.id
                );
            }
        }

        info!("Completed deferred field migration. Processed {processed} records");
        Ok(processed)
    }

    /// Advance the destination's identifier generator past the maximum
    /// copied key. No-op unless the primary key is auto-generated.
    async fn fix_sequence(
        &self,
        entity: &EntityType,
        destination: &dyn DestinationStore,
    ) -> Result<(), CopyError> {
        let Some(pk) = entity.primary_key() else {
            return Ok(());
        };
        if !pk.auto_generated {
            return Ok(());
        }
        if let Some(max) = destination.max_primary_key(entity).await? {
            destination.reset_sequence(entity, max).await?;
            info!("Advanced {} identifier sequence past {max}", entity.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_rows_keep_the_configured_batch() {
        // 7 fields: no doubling
        assert_eq!(statement_batch_size(5000, 7), 5000);
    }

    #[test]
    fn wide_rows_double_but_the_cap_dominates() {
        // 11 fields: min(10000, 5000) = 5000
        assert_eq!(statement_batch_size(5000, 11), 5000);
        // smaller configured batches actually benefit from doubling
        assert_eq!(statement_batch_size(2000, 11), 4000);
    }
}
