//! Access to the external dataset warehouse.
//!
//! The warehouse is a PostgreSQL database we read from but do not own. Each call
//! borrows a pooled connection for the duration of one statement; the connection
//! goes back to the pool when the future completes or is dropped, on success and
//! on error alike.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    db::DbPool,
    error::AppError,
    models::dataset::{ColumnInfo, Row, TableStats},
    services::query_builder::{BuiltQuery, SqlParam, quote_identifier},
};

/// Read operations the dataset endpoints need from the warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Execute a built query and return its rows as JSON objects in column order.
    async fn fetch_rows(&self, query: &BuiltQuery) -> Result<Vec<Row>, AppError>;

    /// Row count and column list of one table.
    async fn table_stats(&self, table: &str) -> Result<TableStats, AppError>;

    /// Connectivity check for `/health`.
    async fn ping(&self) -> Result<(), AppError>;
}

/// Warehouse backed by a sqlx PostgreSQL pool.
#[derive(Clone)]
pub struct PgWarehouse {
    pool: DbPool,
}

impl PgWarehouse {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn fetch_rows(&self, query: &BuiltQuery) -> Result<Vec<Row>, AppError> {
        // row_to_json keeps the column order of the inner SELECT
        let sql = format!("SELECT row_to_json(q) FROM ({}) AS q", query.sql);

        let mut statement = sqlx::query_scalar::<_, Value>(&sql);
        for param in &query.params {
            statement = match param {
                SqlParam::Text(s) => statement.bind(s.clone()),
                SqlParam::Int(n) => statement.bind(*n),
                SqlParam::Float(f) => statement.bind(*f),
                SqlParam::Bool(b) => statement.bind(*b),
                SqlParam::TextList(items) => statement.bind(items.clone()),
            };
        }

        tracing::debug!(table = %query.table, sql = %query.to_inline_sql(), "Executing warehouse query");

        let values = statement.fetch_all(&self.pool).await?;

        Ok(values
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect())
    }

    async fn table_stats(&self, table: &str) -> Result<TableStats, AppError> {
        let table_sql = quote_identifier(table)?;

        let columns = sqlx::query_as::<_, ColumnInfo>(
            r#"
            SELECT column_name::text AS name, data_type::text AS data_type
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table_sql}"))
            .fetch_one(&self.pool)
            .await?;

        Ok(TableStats::new(table, row_count, columns))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
