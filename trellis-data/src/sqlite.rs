//! SQLite connection source backed by an sqlx pool.

use crate::{BoxError, Connection, ConnectionSource, DataError, DataResult, Row};
use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _};
use trellis_config::DatabaseConfig;
use tracing::info;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Pooled SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Open a pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> DataResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await
            .map_err(|e| DataError::access("open sqlite pool", e))?;
        info!(url = %config.url, max_connections = config.max_connections, "SQLite pool opened");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionSource for SqliteSource {
    async fn acquire(&self) -> Result<Box<dyn Connection>, BoxError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(SqliteConnection {
            conn,
            in_transaction: false,
        }))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// One pooled SQLite connection.
pub struct SqliteConnection {
    conn: PoolConnection<Sqlite>,
    in_transaction: bool,
}

impl SqliteConnection {
    async fn control(&mut self, sql: &'static str) -> Result<(), BoxError> {
        sqlx::query(sql).execute(&mut *self.conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BoxError> {
        let rows = bind(sqlx::query(sql), params)
            .fetch_all(&mut *self.conn)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BoxError> {
        let result = bind(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> Result<(), BoxError> {
        self.control("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        self.control("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxError> {
        self.control("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        // An open transaction must not go back into the pool.
        if self.in_transaction {
            self.conn.close_on_drop();
        }
    }
}

fn bind<'q>(mut query: SqliteQuery<'q>, params: &[Value]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Result<Row, BoxError> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_value(row, index)?);
    }
    Ok(out)
}

fn decode_value(row: &SqliteRow, index: usize) -> Result<Value, BoxError> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map(Value::from).unwrap_or(Value::Null));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return Ok(value
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return Ok(value.map(Value::String).unwrap_or(Value::Null));
    }
    let bytes = row.try_get::<Option<Vec<u8>>, _>(index)?;
    Ok(bytes
        .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
        .unwrap_or(Value::Null))
}
