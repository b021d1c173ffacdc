//! Read side of a migration: catalog probes and streamed record reads.
use async_trait::async_trait;
use futures::stream::BoxStream;
use migrator_shared::{EntityType, Record};

use crate::errors::StoreError;

/// Streamed records from the source store. Backed by a server-side cursor
/// so memory stays bounded regardless of table size.
pub type RecordStream<'a> = BoxStream<'a, Result<Record, StoreError>>;

/// A trait that defines the read interface over the source store.
///
/// Implementors provide catalog existence checks, best-effort row counts,
/// and streamed chunked reads of entity-type records.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Whether a table with the given name exists in the store's schema
    /// catalog.
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Column names of the given table, from the schema catalog.
    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Best-effort row count, used only for progress reporting.
    async fn estimate_count(&self, table: &str) -> Result<u64, StoreError>;

    /// Stream all records of `entity`, selecting only `columns`, ordered by
    /// primary key when one is declared.
    fn stream_records<'a>(
        &'a self,
        entity: &'a EntityType,
        columns: &'a [String],
    ) -> RecordStream<'a>;

    /// Stream records where at least one of the given deferred columns is
    /// non-empty, selecting only the primary key and those columns. The
    /// caller passes the deferred columns that survived validation, so a
    /// column absent on the source never reaches the query.
    fn stream_deferred_candidates<'a>(
        &'a self,
        entity: &'a EntityType,
        deferred: &'a [String],
    ) -> RecordStream<'a>;
}
