//! Driver-facing connection contracts.
//!
//! The data layer never pools or configures connections itself: a
//! [`ConnectionSource`] hands out connections and the layer only marks
//! transactional state on them and gives them back by dropping them.

use crate::BoxError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// A single physical connection.
#[async_trait]
pub trait Connection: Send {
    /// Run a parameterized read and return every row.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BoxError>;

    /// Run a parameterized write and return the affected-row count.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BoxError>;

    /// Disable auto-commit until the next commit or rollback.
    async fn begin(&mut self) -> Result<(), BoxError>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), BoxError>;

    /// Discard the open transaction.
    async fn rollback(&mut self) -> Result<(), BoxError>;
}

/// Supplies raw connections on demand.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Acquire a connection; dropping it returns it to the source.
    async fn acquire(&self) -> Result<Box<dyn Connection>, BoxError>;

    /// Driver name for diagnostics.
    fn name(&self) -> &'static str {
        "custom"
    }
}
