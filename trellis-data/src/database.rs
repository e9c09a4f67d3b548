//! The data access layer.

use crate::statement::{FieldMap, Statement, script_statements};
use crate::{Connection, ConnectionScope, ConnectionSource, DataError, DataResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, trace};

type Slot = Option<Box<dyn Connection>>;

/// Executes statements against the connection associated with a
/// [`ConnectionScope`].
///
/// ```rust,ignore
/// let scope = ConnectionScope::new();
/// db.insert(&scope, "orders", &fields).await?;
/// let orders: Vec<Order> = db.query_list(&scope, "SELECT * FROM orders", &[]).await?;
/// ```
#[derive(Clone)]
pub struct Database {
    source: Arc<dyn ConnectionSource>,
}

impl Database {
    /// Create a data access layer over a connection source.
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self { source }
    }

    /// Create from a concrete source.
    pub fn from_source<S: ConnectionSource + 'static>(source: S) -> Self {
        Self::new(Arc::new(source))
    }

    /// The underlying connection source.
    pub fn source(&self) -> &Arc<dyn ConnectionSource> {
        &self.source
    }

    /// Return the connection held in a locked scope slot, acquiring and
    /// associating one first if needed.
    /// The slot stays locked only for the statement that needs it.
    async fn connection<'s>(&self, slot: &'s mut Slot) -> DataResult<&'s mut Box<dyn Connection>> {
        let conn = match slot.take() {
            Some(conn) => conn,
            None => {
                trace!(driver = self.source.name(), "Acquiring connection for scope");
                self.source.acquire().await.map_err(|e| {
                    error!(error = %e, "get connection failure");
                    DataError::access("get connection", e)
                })?
            }
        };
        Ok(slot.insert(conn))
    }

    /// Run a read and map every row into `T`.
    pub async fn query_list<T: DeserializeOwned>(
        &self,
        scope: &ConnectionScope,
        sql: &str,
        params: &[Value],
    ) -> DataResult<Vec<T>> {
        let mut slot = scope.lock().await;
        let conn = self.connection(&mut slot).await?;
        trace!(sql, "query list");
        let rows = conn.query(sql, params).await.map_err(|e| {
            error!(sql, error = %e, "query entity list failure");
            DataError::access("query entity list", e)
        })?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|e| DataError::access("map row", e))
            })
            .collect()
    }

    /// Run a read and map the first row into `T`.
    pub async fn query_one<T: DeserializeOwned>(
        &self,
        scope: &ConnectionScope,
        sql: &str,
        params: &[Value],
    ) -> DataResult<Option<T>> {
        let mut slot = scope.lock().await;
        let conn = self.connection(&mut slot).await?;
        trace!(sql, "query one");
        let rows = conn.query(sql, params).await.map_err(|e| {
            error!(sql, error = %e, "query entity failure");
            DataError::access("query entity", e)
        })?;

        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|e| DataError::access("map row", e))
            })
            .transpose()
    }

    /// Run a write and return the affected-row count.
    pub async fn execute(&self, scope: &ConnectionScope, sql: &str, params: &[Value]) -> DataResult<u64> {
        let mut slot = scope.lock().await;
        let conn = self.connection(&mut slot).await?;
        trace!(sql, "execute update");
        conn.execute(sql, params).await.map_err(|e| {
            error!(sql, error = %e, "execute update failure");
            DataError::access("execute update", e)
        })
    }

    /// Insert one row built from `fields`.
    pub async fn insert(&self, scope: &ConnectionScope, table: &str, fields: &FieldMap) -> DataResult<u64> {
        let stmt = Statement::insert(table, fields).inspect_err(|e| {
            error!(table, error = %e, "can not insert entity");
        })?;
        self.execute(scope, &stmt.sql, &stmt.params).await
    }

    /// Update the row with `id` from `fields`.
    pub async fn update(
        &self,
        scope: &ConnectionScope,
        table: &str,
        id: i64,
        fields: &FieldMap,
    ) -> DataResult<u64> {
        let stmt = Statement::update(table, id, fields).inspect_err(|e| {
            error!(table, id, error = %e, "can not update entity");
        })?;
        self.execute(scope, &stmt.sql, &stmt.params).await
    }

    /// Delete the row with `id`.
    pub async fn delete(&self, scope: &ConnectionScope, table: &str, id: i64) -> DataResult<u64> {
        let stmt = Statement::delete(table, id)?;
        self.execute(scope, &stmt.sql, &stmt.params).await
    }

    /// Execute each statement of a script in order, returning the count run.
    pub async fn execute_script(&self, scope: &ConnectionScope, script: &str) -> DataResult<usize> {
        let mut count = 0;
        for sql in script_statements(script) {
            self.execute(scope, sql, &[]).await?;
            count += 1;
        }
        debug!(statements = count, "Executed SQL script");
        Ok(count)
    }

    /// Read a script file and execute it.
    pub async fn execute_script_file(&self, scope: &ConnectionScope, path: impl AsRef<Path>) -> DataResult<usize> {
        let path = path.as_ref();
        let script = tokio::fs::read_to_string(path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "execute sql file failure");
            DataError::access("execute sql file", e)
        })?;
        self.execute_script(scope, &script).await
    }

    /// Associate a connection with `scope` and switch it to manual commit.
    ///
    /// If the switch fails the association is dropped again.
    pub async fn begin_transaction(&self, scope: &ConnectionScope) -> DataResult<()> {
        let mut slot = scope.lock().await;
        let conn = self.connection(&mut slot).await?;
        let begun = conn.begin().await;
        if let Err(e) = begun {
            *slot = None;
            error!(error = %e, "begin transaction failure");
            return Err(DataError::access("begin transaction", e));
        }
        debug!("begin transaction");
        Ok(())
    }

    /// Commit and release the association. No-op without an association.
    pub async fn commit_transaction(&self, scope: &ConnectionScope) -> DataResult<()> {
        let Some(mut conn) = scope.release().await else {
            trace!("commit requested without an associated connection");
            return Ok(());
        };
        conn.commit().await.map_err(|e| {
            error!(error = %e, "commit transaction failure");
            DataError::access("commit transaction", e)
        })?;
        debug!("commit transaction");
        Ok(())
    }

    /// Roll back and release the association. No-op without an association.
    pub async fn rollback_transaction(&self, scope: &ConnectionScope) -> DataResult<()> {
        let Some(mut conn) = scope.release().await else {
            trace!("rollback requested without an associated connection");
            return Ok(());
        };
        conn.rollback().await.map_err(|e| {
            error!(error = %e, "rollback transaction failure");
            DataError::access("rollback transaction", e)
        })?;
        debug!("rollback transaction");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.source.name())
            .finish()
    }
}
