//! Connection association for one logical call path.

use crate::Connection;
use tokio::sync::{Mutex, MutexGuard};

/// Binds a logical call path to at most one reusable connection.
///
/// The association is created by the first [`Database`](crate::Database)
/// operation run against the scope and torn down by a
/// commit, a rollback, or by dropping the scope, which drops the connection
/// and returns it to its source. The slot is an async mutex, so overlapping
/// calls on one scope are serialized on the single connection.
pub struct ConnectionScope {
    slot: Mutex<Option<Box<dyn Connection>>>,
}

impl ConnectionScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Whether a connection is currently associated.
    pub async fn is_associated(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Connection>>> {
        self.slot.lock().await
    }

    /// Remove the association, handing the connection to the caller.
    pub(crate) async fn release(&self) -> Option<Box<dyn Connection>> {
        self.slot.lock().await.take()
    }
}

impl Default for ConnectionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let associated = self.slot.try_lock().map(|slot| slot.is_some()).ok();
        f.debug_struct("ConnectionScope")
            .field("associated", &associated)
            .finish()
    }
}
