//! PostgreSQL implementation of the source and destination store traits.
//!
//! Bulk writes use `QueryBuilder::push_values` with `ON CONFLICT DO NOTHING`
//! so duplicate primary keys are skipped, not errored. Constraint checks are
//! deferred per copy transaction (`SET CONSTRAINTS ALL DEFERRED`), and
//! auto-increment repair goes through `pg_get_serial_sequence`.
use async_stream::try_stream;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgColumn, PgPool, PgPoolOptions, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{Column, Postgres, QueryBuilder, Row, TypeInfo};
use uuid::Uuid;

use migrator_shared::{EntityType, Record, SqlValue};

use crate::errors::StoreError;
use crate::interfaces::{CopyTransaction, DestinationStore, Engine, RecordStream, SourceStore};

/// PostgreSQL limits a single statement to 65535 bind parameters.
const BIND_LIMIT: usize = 65535;

/// PostgreSQL-backed store, usable as either side of a migration.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rows per statement such that `rows * columns` stays under the bind limit.
pub(crate) fn rows_per_statement(statement_batch: usize, column_count: usize) -> usize {
    let by_binds = BIND_LIMIT / column_count.max(1);
    statement_batch.min(by_binds).max(1)
}

fn decode_row(row: &PgRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = decode_column(row, column)?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_column(row: &PgRow, column: &PgColumn) -> Result<SqlValue, StoreError> {
    let idx = column.ordinal();
    let decoded = match column.type_info().name() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(SqlValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)?
            .map(|v| SqlValue::Int(v as i64)),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)?
            .map(|v| SqlValue::Int(v as i64)),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(SqlValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| SqlValue::Float(v as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::Float),
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(idx)?
            .map(SqlValue::Decimal),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text)
        }
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(idx)?.map(SqlValue::Bytes),
        "UUID" => row.try_get::<Option<Uuid>, _>(idx)?.map(SqlValue::Uuid),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(SqlValue::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|v| SqlValue::Timestamp(v.and_utc())),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(SqlValue::Date),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(SqlValue::Json),
        other => {
            return Err(StoreError::UnsupportedType {
                column: column.name().to_string(),
                type_name: other.to_string(),
            });
        }
    };
    Ok(decoded.unwrap_or(SqlValue::Null))
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &SqlValue) {
    match value {
        SqlValue::Null => {
            qb.push("NULL");
        }
        SqlValue::Bool(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Int(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Float(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Decimal(v) => {
            qb.push_bind(v.clone());
        }
        SqlValue::Text(v) => {
            qb.push_bind(v.clone());
        }
        SqlValue::Bytes(v) => {
            qb.push_bind(v.clone());
        }
        SqlValue::Uuid(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Timestamp(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Date(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Json(v) => {
            qb.push_bind(v.clone());
        }
    }
}

fn push_value_separated(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &SqlValue) {
    match value {
        SqlValue::Null => {
            b.push("NULL");
        }
        SqlValue::Bool(v) => {
            b.push_bind(*v);
        }
        SqlValue::Int(v) => {
            b.push_bind(*v);
        }
        SqlValue::Float(v) => {
            b.push_bind(*v);
        }
        SqlValue::Decimal(v) => {
            b.push_bind(v.clone());
        }
        SqlValue::Text(v) => {
            b.push_bind(v.clone());
        }
        SqlValue::Bytes(v) => {
            b.push_bind(v.clone());
        }
        SqlValue::Uuid(v) => {
            b.push_bind(*v);
        }
        SqlValue::Timestamp(v) => {
            b.push_bind(*v);
        }
        SqlValue::Date(v) => {
            b.push_bind(*v);
        }
        SqlValue::Json(v) => {
            b.push_bind(v.clone());
        }
    }
}

/// Predicate matching non-empty values for textual deferred columns.
fn non_empty_predicate(column: &str) -> String {
    format!("NULLIF({}, '') IS NOT NULL", quote_ident(column))
}

#[async_trait]
impl SourceStore for PostgresStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = 'public'
                AND table_name = $1
            )",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT column_name
             FROM information_schema.columns
             WHERE table_schema = 'public'
             AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(StoreError::from))
            .collect()
    }

    async fn estimate_count(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    fn stream_records<'a>(
        &'a self,
        entity: &'a EntityType,
        columns: &'a [String],
    ) -> RecordStream<'a> {
        Box::pin(try_stream! {
            let order = entity
                .primary_key()
                .map(|pk| format!(" ORDER BY {}", quote_ident(&pk.name)))
                .unwrap_or_default();
            let sql = format!(
                "SELECT {} FROM {}{}",
                column_list(columns),
                quote_ident(&entity.table),
                order,
            );
            let mut rows = sqlx::query(&sql).fetch(&self.pool);
            while let Some(row) = rows.try_next().await? {
                yield decode_row(&row)?;
            }
        })
    }

    fn stream_deferred_candidates<'a>(
        &'a self,
        entity: &'a EntityType,
        deferred: &'a [String],
    ) -> RecordStream<'a> {
        Box::pin(try_stream! {
            let pk = entity.primary_key().ok_or_else(|| {
                StoreError::MissingPrimaryKey(entity.id.to_string())
            })?;
            let mut columns = vec![pk.name.clone()];
            columns.extend(deferred.iter().cloned());
            let predicate = deferred
                .iter()
                .map(|c| non_empty_predicate(c))
                .collect::<Vec<_>>()
                .join(" OR ");
            let sql = format!(
                "SELECT {} FROM {} WHERE {} ORDER BY {}",
                column_list(&columns),
                quote_ident(&entity.table),
                predicate,
                quote_ident(&pk.name),
            );
            let mut rows = sqlx::query(&sql).fetch(&self.pool);
            while let Some(row) = rows.try_next().await? {
                yield decode_row(&row)?;
            }
        })
    }
}

/// One entity type's copy on a pooled PostgreSQL transaction.
pub struct PgCopyTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl CopyTransaction for PgCopyTransaction {
    async fn suspend_constraints(&mut self) -> Result<(), StoreError> {
        sqlx::query("SET CONSTRAINTS ALL DEFERRED")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn restore_constraints(&mut self) -> Result<(), StoreError> {
        sqlx::query("SET CONSTRAINTS ALL IMMEDIATE")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_ignore(
        &mut self,
        entity: &EntityType,
        columns: &[String],
        records: &[Record],
        statement_batch: usize,
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let chunk = rows_per_statement(statement_batch, columns.len());
        let mut inserted = 0u64;
        for part in records.chunks(chunk) {
            let mut qb = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO {} ({}) ",
                quote_ident(&entity.table),
                column_list(columns),
            ));
            qb.push_values(part, |mut b, record| {
                for column in columns {
                    push_value_separated(&mut b, record.get_or_null(column));
                }
            });
            qb.push(" ON CONFLICT DO NOTHING");
            let result = qb.build().execute(&mut *self.tx).await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for PostgresStore {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        SourceStore::column_names(self, table).await
    }

    async fn begin_copy(&self) -> Result<Box<dyn CopyTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCopyTransaction { tx }))
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
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "UPDATE {} SET ",
            quote_ident(&entity.table)
        ));
        for (i, (column, value)) in values.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(format!("{} = ", quote_ident(column)));
            push_value(&mut qb, value);
        }
        qb.push(format!(" WHERE {} = ", quote_ident(&pk.name)));
        push_value(&mut qb, primary_key);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn max_primary_key(&self, entity: &EntityType) -> Result<Option<i64>, StoreError> {
        let pk = entity
            .primary_key()
            .ok_or_else(|| StoreError::MissingPrimaryKey(entity.id.to_string()))?;
        let sql = format!(
            "SELECT MAX({})::bigint FROM {}",
            quote_ident(&pk.name),
            quote_ident(&entity.table),
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<Option<i64>, _>(0)?)
    }

    async fn reset_sequence(
        &self,
        entity: &EntityType,
        max_primary_key: i64,
    ) -> Result<(), StoreError> {
        let pk = entity
            .primary_key()
            .ok_or_else(|| StoreError::MissingPrimaryKey(entity.id.to_string()))?;
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), {})",
            entity.table, pk.name, max_primary_key,
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}
