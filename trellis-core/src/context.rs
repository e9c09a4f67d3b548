//! Per-call execution context.

use std::sync::atomic::{AtomicBool, Ordering};
use trellis_data::ConnectionScope;
use uuid::Uuid;

/// State owned by one logical call path: its connection association and
/// whether a transaction is already open for the call tree.
///
/// One context is created per dispatched request and passed by reference
/// through the interception chain into every data-access call. Dropping it
/// drops any still-associated connection, discarding uncommitted work.
#[derive(Debug)]
pub struct CallContext {
    id: Uuid,
    scope: ConnectionScope,
    in_transaction: AtomicBool,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            scope: ConnectionScope::new(),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Correlation id for log records.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connection association handed to the data layer.
    pub fn scope(&self) -> &ConnectionScope {
        &self.scope
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    /// Set the transaction flag if it is clear.
    ///
    /// Returns `None` when a transaction is already open on this call path.
    /// The flag stays set until the returned guard is dropped.
    pub fn enter_transaction(&self) -> Option<TransactionFlag<'_>> {
        self.in_transaction
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransactionFlag { cx: self })
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the transaction flag on drop.
#[must_use = "the flag is cleared as soon as the guard is dropped"]
pub struct TransactionFlag<'a> {
    cx: &'a CallContext,
}

impl Drop for TransactionFlag<'_> {
    fn drop(&mut self) {
        self.cx.in_transaction.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_set_once() {
        let cx = CallContext::new();
        assert!(!cx.in_transaction());

        let guard = cx.enter_transaction();
        assert!(guard.is_some());
        assert!(cx.in_transaction());
        assert!(cx.enter_transaction().is_none());

        drop(guard);
        assert!(!cx.in_transaction());
        assert!(cx.enter_transaction().is_some());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = CallContext::new();
        let b = CallContext::new();
        let _guard = a.enter_transaction();
        assert!(!b.in_transaction());
        assert_ne!(a.id(), b.id());
    }
}
