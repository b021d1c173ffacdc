//! MySQL implementation of the source and destination store traits.
//!
//! Bulk writes use `INSERT IGNORE`, constraint checks toggle the
//! session-scoped `FOREIGN_KEY_CHECKS` flag on the copy transaction's
//! connection, and auto-increment repair is an `ALTER TABLE` statement.
use async_stream::try_stream;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use futures::TryStreamExt;
use sqlx::mysql::{MySqlColumn, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query_builder::Separated;
use sqlx::{Column, MySql, QueryBuilder, Row, TypeInfo};

use migrator_shared::{EntityType, Record, SqlValue};

use crate::errors::StoreError;
use crate::interfaces::{CopyTransaction, DestinationStore, Engine, RecordStream, SourceStore};

/// The binary protocol caps a statement at 65535 placeholders.
const BIND_LIMIT: usize = 65535;

/// MySQL-backed store, usable as either side of a migration.
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn rows_per_statement(statement_batch: usize, column_count: usize) -> usize {
    let by_binds = BIND_LIMIT / column_count.max(1);
    statement_batch.min(by_binds).max(1)
}

fn decode_row(row: &MySqlRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = decode_column(row, column)?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_column(row: &MySqlRow, column: &MySqlColumn) -> Result<SqlValue, StoreError> {
    let idx = column.ordinal();
    let decoded = match column.type_info().name() {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(idx)?.map(SqlValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(idx)?.map(SqlValue::Int)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row
            .try_get::<Option<u64>, _>(idx)?
            .map(|v| SqlValue::Int(v as i64)),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| SqlValue::Float(v as f64)),
        "DOUBLE" => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::Float),
        "DECIMAL" => row
            .try_get::<Option<BigDecimal>, _>(idx)?
            .map(SqlValue::Decimal),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" => {
            row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text)
        }
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            row.try_get::<Option<Vec<u8>>, _>(idx)?.map(SqlValue::Bytes)
        }
        "TIMESTAMP" | "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|v| SqlValue::Timestamp(v.and_utc())),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(SqlValue::Date),
        "JSON" => row
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

fn push_value(qb: &mut QueryBuilder<'_, MySql>, value: &SqlValue) {
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
        // MySQL has no native uuid type; store the hyphenated form
        SqlValue::Uuid(v) => {
            qb.push_bind(v.to_string());
        }
        SqlValue::Timestamp(v) => {
            qb.push_bind(v.naive_utc());
        }
        SqlValue::Date(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Json(v) => {
            qb.push_bind(v.clone());
        }
    }
}

fn push_value_separated(b: &mut Separated<'_, '_, MySql, &'static str>, value: &SqlValue) {
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
            b.push_bind(v.to_string());
        }
        SqlValue::Timestamp(v) => {
            b.push_bind(v.naive_utc());
        }
        SqlValue::Date(v) => {
            b.push_bind(*v);
        }
        SqlValue::Json(v) => {
            b.push_bind(v.clone());
        }
    }
}

fn non_empty_predicate(column: &str) -> String {
    format!("NULLIF({}, '') IS NOT NULL", quote_ident(column))
}

#[async_trait]
impl SourceStore for MySqlStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = DATABASE()
                AND table_name = ?
            )",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        let exists: i64 = row.try_get(0)?;
        Ok(exists != 0)
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT column_name
             FROM information_schema.columns
             WHERE table_schema = DATABASE()
             AND table_name = ?
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

/// One entity type's copy on a pooled MySQL transaction.
pub struct MySqlCopyTransaction {
    tx: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl CopyTransaction for MySqlCopyTransaction {
    async fn suspend_constraints(&mut self) -> Result<(), StoreError> {
        sqlx::query("SET FOREIGN_KEY_CHECKS=0")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn restore_constraints(&mut self) -> Result<(), StoreError> {
        sqlx::query("SET FOREIGN_KEY_CHECKS=1")
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
            let mut qb = QueryBuilder::<MySql>::new(format!(
                "INSERT IGNORE INTO {} ({}) ",
                quote_ident(&entity.table),
                column_list(columns),
            ));
            qb.push_values(part, |mut b, record| {
                for column in columns {
                    push_value_separated(&mut b, record.get_or_null(column));
                }
            });
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
impl DestinationStore for MySqlStore {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        SourceStore::column_names(self, table).await
    }

    async fn begin_copy(&self) -> Result<Box<dyn CopyTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlCopyTransaction { tx }))
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

        // UPDATE reports zero affected rows when the new values equal the
        // old ones, so existence needs its own probe.
        let mut probe = QueryBuilder::<MySql>::new(format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = ",
            quote_ident(&entity.table),
            quote_ident(&pk.name),
        ));
        push_value(&mut probe, primary_key);
        probe.push(")");
        let row = probe.build().fetch_one(&self.pool).await?;
        let exists: i64 = row.try_get(0)?;
        if exists == 0 {
            return Ok(false);
        }

        let mut qb = QueryBuilder::<MySql>::new(format!(
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
        qb.build().execute(&self.pool).await?;
        Ok(true)
    }

    async fn max_primary_key(&self, entity: &EntityType) -> Result<Option<i64>, StoreError> {
        let pk = entity
            .primary_key()
            .ok_or_else(|| StoreError::MissingPrimaryKey(entity.id.to_string()))?;
        let sql = format!(
            "SELECT CAST(MAX({}) AS SIGNED) FROM {}",
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
        let sql = format!(
            "ALTER TABLE {} AUTO_INCREMENT = {}",
            quote_ident(&entity.table),
            max_primary_key + 1,
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_uses_backticks() {
        assert_eq!(quote_ident("shop_order"), "`shop_order`");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn statement_rows_respect_bind_limit() {
        assert_eq!(rows_per_statement(10000, 6), 10000);
        assert_eq!(rows_per_statement(10000, 24), 65535 / 24);
    }
}
