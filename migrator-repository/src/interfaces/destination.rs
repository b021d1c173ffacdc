//! Write side of a migration: scoped copy transactions, deferred-field
//! updates, and auto-increment repair.
use async_trait::async_trait;
use migrator_shared::{EntityType, Record, SqlValue};

use crate::errors::StoreError;

/// Destination engine identity. Used for logging; the engine-specific SQL
/// itself lives inside the store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Postgres,
    MySql,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::MySql => "mysql",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entity type's copy, scoped to a single destination transaction.
///
/// Constraint suspension runs on the transaction's pinned connection, which
/// is the engine-correct scope for both `SET CONSTRAINTS` (transaction) and
/// `FOREIGN_KEY_CHECKS` (session).
#[async_trait]
pub trait CopyTransaction: Send {
    /// Suspend referential-integrity enforcement for this copy.
    async fn suspend_constraints(&mut self) -> Result<(), StoreError>;

    /// Restore referential-integrity enforcement. Called on every exit
    /// path, success or failure.
    async fn restore_constraints(&mut self) -> Result<(), StoreError>;

    /// Bulk-insert `records`, silently skipping rows that violate
    /// uniqueness constraints. One call per buffer flush; implementations
    /// split into statements of at most `statement_batch` rows (and further
    /// to respect engine bind limits). Returns the number of rows actually
    /// inserted.
    async fn insert_ignore(
        &mut self,
        entity: &EntityType,
        columns: &[String],
        records: &[Record],
        statement_batch: usize,
    ) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A trait that defines the write interface over the destination store.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    fn engine(&self) -> Engine;

    /// Column names of the given table, from the schema catalog.
    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Open the transaction scope for one entity type's copy.
    async fn begin_copy(&self) -> Result<Box<dyn CopyTransaction>, StoreError>;

    /// Update only the given deferred fields of an already-written record,
    /// identified by primary key. Returns false when the destination record
    /// does not exist.
    async fn update_deferred(
        &self,
        entity: &EntityType,
        primary_key: &SqlValue,
        values: &[(String, SqlValue)],
    ) -> Result<bool, StoreError>;

    /// `MAX(primary_key)` over the destination table, post-copy.
    async fn max_primary_key(&self, entity: &EntityType) -> Result<Option<i64>, StoreError>;

    /// Advance the identifier generator so the next auto-generated value
    /// exceeds `max_primary_key`.
    async fn reset_sequence(&self, entity: &EntityType, max_primary_key: i64)
    -> Result<(), StoreError>;
}
