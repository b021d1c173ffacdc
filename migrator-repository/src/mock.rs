//! In-memory mock store for testing the pipeline without a database.
//!
//! `MockStore` implements both `SourceStore` and `DestinationStore` over
//! plain in-memory tables, records every bulk-write call, constraint
//! toggle, and sequence reset, and honors the conflict-skipping semantics
//! of the real bulk insert. Tests can also inject catalog and insert
//! failures.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use migrator_shared::{EntityType, Record, SqlValue};

use crate::errors::StoreError;
use crate::interfaces::{CopyTransaction, DestinationStore, Engine, RecordStream, SourceStore};

#[derive(Debug, Clone, Default)]
struct MockTable {
    columns: Vec<String>,
    rows: Vec<Record>,
}

#[derive(Default)]
struct MockState {
    tables: Mutex<HashMap<String, MockTable>>,
    insert_calls: Mutex<Vec<usize>>,
    events: Mutex<Vec<&'static str>>,
    sequence_resets: Mutex<Vec<(String, i64)>>,
    failing_catalog: Mutex<HashSet<String>>,
    // remaining successful insert calls before an injected failure
    fail_insert_after: Mutex<Option<usize>>,
    // primary keys `update_deferred` reports as not found
    missing_rows: Mutex<HashSet<String>>,
}

/// Mock store that keeps tables in memory and records interactions.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<MockState>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table with the given columns.
    pub fn create_table(&self, table: &str, columns: &[&str]) {
        let mut tables = self.state.tables.lock().unwrap();
        tables.insert(
            table.to_string(),
            MockTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    /// Append rows to a table without conflict checking (test seeding).
    pub fn seed_rows(&self, table: &str, rows: Vec<Record>) {
        let mut tables = self.state.tables.lock().unwrap();
        if let Some(t) = tables.get_mut(table) {
            t.rows.extend(rows);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.state.tables.lock().unwrap();
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Record counts passed to each `insert_ignore` call, in order.
    pub fn insert_call_sizes(&self) -> Vec<usize> {
        self.state.insert_calls.lock().unwrap().clone()
    }

    /// Constraint/transaction events in order:
    /// `suspend`, `restore`, `commit`, `rollback`.
    pub fn events(&self) -> Vec<&'static str> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn sequence_resets(&self) -> Vec<(String, i64)> {
        self.state.sequence_resets.lock().unwrap().clone()
    }

    /// Make catalog queries against `table` fail.
    pub fn fail_catalog_for(&self, table: &str) {
        self.state
            .failing_catalog
            .lock()
            .unwrap()
            .insert(table.to_string());
    }

    /// Make the Nth-and-later `insert_ignore` calls fail
    /// (`calls` successful calls are allowed first).
    pub fn fail_inserts_after(&self, calls: usize) {
        *self.state.fail_insert_after.lock().unwrap() = Some(calls);
    }

    /// Make `update_deferred` report the given primary key as not found,
    /// as if the row vanished between the bulk and deferred passes.
    pub fn report_row_missing(&self, primary_key: &SqlValue) {
        self.state
            .missing_rows
            .lock()
            .unwrap()
            .insert(primary_key.to_string());
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.state.tables.lock().unwrap();
        tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or(sqlx::Error::RowNotFound)
            .map_err(StoreError::from)
    }

    /// Streams reject columns the table does not have, like the real
    /// stores' SQL would.
    fn check_columns(&self, table: &str, columns: &[String]) -> Result<(), StoreError> {
        let known = self.table_columns(table)?;
        for column in columns {
            if !known.contains(column) {
                return Err(StoreError::MissingColumn {
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    fn sorted_rows(&self, entity: &EntityType) -> Vec<Record> {
        let mut rows = self.rows(&entity.table);
        if let Some(pk) = entity.primary_key() {
            rows.sort_by_key(|r| r.get_or_null(&pk.name).as_int().unwrap_or(i64::MAX));
        }
        rows
    }
}

fn injected_failure() -> StoreError {
    StoreError::Database(sqlx::Error::Protocol("injected mock failure".into()))
}

fn project(record: &Record, columns: &[String]) -> Record {
    Record::from_pairs(
        columns
            .iter()
            .map(|c| (c.clone(), record.get_or_null(c).clone())),
    )
}

#[async_trait]
impl SourceStore for MockStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        if self.state.failing_catalog.lock().unwrap().contains(table) {
            return Err(injected_failure());
        }
        Ok(self.state.tables.lock().unwrap().contains_key(table))
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.table_columns(table)
    }

    async fn estimate_count(&self, table: &str) -> Result<u64, StoreError> {
        Ok(self.row_count(table) as u64)
    }

    fn stream_records<'a>(
        &'a self,
        entity: &'a EntityType,
        columns: &'a [String],
    ) -> RecordStream<'a> {
        if let Err(e) = self.check_columns(&entity.table, columns) {
            return Box::pin(stream::iter([Err::<Record, StoreError>(e)]));
        }
        let rows = self.sorted_rows(entity);
        Box::pin(stream::iter(
            rows.into_iter().map(|r| Ok(project(&r, columns))),
        ))
    }

    fn stream_deferred_candidates<'a>(
        &'a self,
        entity: &'a EntityType,
        deferred: &'a [String],
    ) -> RecordStream<'a> {
        let mut columns: Vec<String> = entity
            .primary_key()
            .map(|pk| vec![pk.name.clone()])
            .unwrap_or_default();
        columns.extend(deferred.iter().cloned());
        if let Err(e) = self.check_columns(&entity.table, &columns) {
            return Box::pin(stream::iter([Err::<Record, StoreError>(e)]));
        }
        let rows: Vec<Record> = self
            .sorted_rows(entity)
            .into_iter()
            .filter(|r| deferred.iter().any(|c| !r.get_or_null(c).is_empty()))
            .map(|r| project(&r, &columns))
            .collect();
        Box::pin(stream::iter(rows.into_iter().map(Ok)))
    }
}

/// Staged writes for one entity type's copy; merged on commit, discarded
/// on rollback.
pub struct MockCopyTransaction {
    state: Arc<MockState>,
    staged: HashMap<String, Vec<Record>>,
}

#[async_trait]
impl CopyTransaction for MockCopyTransaction {
    async fn suspend_constraints(&mut self) -> Result<(), StoreError> {
        self.state.events.lock().unwrap().push("suspend");
        Ok(())
    }

    async fn restore_constraints(&mut self) -> Result<(), StoreError> {
        self.state.events.lock().unwrap().push("restore");
        Ok(())
    }

    async fn insert_ignore(
        &mut self,
        entity: &EntityType,
        columns: &[String],
        records: &[Record],
        _statement_batch: usize,
    ) -> Result<u64, StoreError> {
        {
            let mut remaining = self.state.fail_insert_after.lock().unwrap();
            if let Some(n) = remaining.as_mut() {
                if *n == 0 {
                    return Err(injected_failure());
                }
                *n -= 1;
            }
        }
        self.state.insert_calls.lock().unwrap().push(records.len());

        let pk_column = entity.primary_key().map(|f| f.name.clone());
        let mut seen: HashSet<String> = HashSet::new();
        if let Some(pk) = &pk_column {
            let tables = self.state.tables.lock().unwrap();
            if let Some(t) = tables.get(&entity.table) {
                seen.extend(t.rows.iter().map(|r| r.get_or_null(pk).to_string()));
            }
            if let Some(staged) = self.staged.get(&entity.table) {
                seen.extend(staged.iter().map(|r| r.get_or_null(pk).to_string()));
            }
        }

        let staged = self.staged.entry(entity.table.clone()).or_default();
        let mut inserted = 0u64;
        for record in records {
            if let Some(pk) = &pk_column {
                let key = record.get_or_null(pk).to_string();
                if !seen.insert(key) {
                    continue; // conflict: silently skipped
                }
            }
            staged.push(project(record, columns));
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.state.events.lock().unwrap().push("commit");
        let mut tables = this.state.tables.lock().unwrap();
        for (table, rows) in this.staged {
            tables.entry(table).or_default().rows.extend(rows);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.state.events.lock().unwrap().push("rollback");
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for MockStore {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.table_columns(table)
    }

    async fn begin_copy(&self) -> Result<Box<dyn CopyTransaction>, StoreError> {
        Ok(Box::new(MockCopyTransaction {
            state: Arc::clone(&self.state),
            staged: HashMap::new(),
        }))
    }

    async fn update_deferred(
        &self,
        entity: &EntityType,
        primary_key: &SqlValue,
        values: &[(String, SqlValue)],
    ) -> Result<bool, StoreError> {
        let pk = entity
            .primary_key()
            .ok_or_else(|| StoreError::MissingPrimaryKey(entity.id.to_string()))?;
        if self
            .state
            .missing_rows
            .lock()
            .unwrap()
            .contains(&primary_key.to_string())
        {
            return Ok(false);
        }
        let mut tables = self.state.tables.lock().unwrap();
        let Some(table) = tables.get_mut(&entity.table) else {
            return Ok(false);
        };
        let Some(row) = table
            .rows
            .iter_mut()
            .find(|r| r.get_or_null(&pk.name) == primary_key)
        else {
            return Ok(false);
        };
        for (column, value) in values {
            row.insert(column.clone(), value.clone());
        }
        Ok(true)
    }

    async fn max_primary_key(&self, entity: &EntityType) -> Result<Option<i64>, StoreError> {
        let pk = entity
            .primary_key()
            .ok_or_else(|| StoreError::MissingPrimaryKey(entity.id.to_string()))?;
        Ok(self
            .rows(&entity.table)
            .iter()
            .filter_map(|r| r.get_or_null(&pk.name).as_int())
            .max())
    }

    async fn reset_sequence(
        &self,
        entity: &EntityType,
        max_primary_key: i64,
    ) -> Result<(), StoreError> {
        self.state
            .sequence_resets
            .lock()
            .unwrap()
            .push((entity.table.clone(), max_primary_key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrator_shared::{EntityTypeId, FieldSpec};

    fn order_entity() -> EntityType {
        EntityType {
            id: EntityTypeId::new("shop", "order"),
            table: "shop_order".to_string(),
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    references: None,
                    primary_key: true,
                    auto_generated: true,
                    deferred: false,
                },
                FieldSpec::plain("total"),
            ],
        }
    }

    fn row(id: i64, total: i64) -> Record {
        Record::from_pairs([("id", SqlValue::Int(id)), ("total", SqlValue::Int(total))])
    }

    #[tokio::test]
    async fn insert_ignore_skips_duplicate_primary_keys() {
        let store = MockStore::new();
        store.create_table("shop_order", &["id", "total"]);
        let entity = order_entity();
        let columns = vec!["id".to_string(), "total".to_string()];

        let mut tx = store.begin_copy().await.unwrap();
        let inserted = tx
            .insert_ignore(&entity, &columns, &[row(1, 10), row(1, 20), row(2, 30)], 5000)
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        tx.commit().await.unwrap();
        assert_eq!(store.row_count("shop_order"), 2);
    }

    #[tokio::test]
    async fn streams_reject_columns_the_table_does_not_have() {
        use futures::TryStreamExt;

        let store = MockStore::new();
        store.create_table("shop_order", &["id", "total"]);
        let entity = order_entity();

        let columns = vec!["id".to_string(), "discount".to_string()];
        let mut stream = store.stream_records(&entity, &columns);
        let err = stream.try_next().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::MissingColumn { ref column } if column == "discount"
        ));

        let deferred = vec!["discount".to_string()];
        let mut stream = store.stream_deferred_candidates(&entity, &deferred);
        let err = stream.try_next().await.unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn { .. }));
    }

    #[tokio::test]
    async fn rollback_discards_staged_rows() {
        let store = MockStore::new();
        store.create_table("shop_order", &["id", "total"]);
        let entity = order_entity();
        let columns = vec!["id".to_string(), "total".to_string()];

        let mut tx = store.begin_copy().await.unwrap();
        tx.insert_ignore(&entity, &columns, &[row(1, 10)], 5000)
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.row_count("shop_order"), 0);
    }
}
