//! Transaction interceptor.

use crate::interceptor::{Interceptor, Invocation, Next, Returned};
use crate::Error;
use async_trait::async_trait;
use trellis_data::Database;
use tracing::{debug, error};

/// Runs transactional actions inside one transaction per call tree.
///
/// The outermost transactional call on a [`CallContext`](crate::CallContext)
/// begins a transaction on the context's connection, commits on success and
/// rolls back on failure. Transactional calls nested inside it, and calls to
/// unmarked actions, pass straight through and share the open transaction.
pub struct TransactionInterceptor {
    database: Database,
}

impl TransactionInterceptor {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Interceptor for TransactionInterceptor {
    async fn intercept<'a>(
        &'a self,
        invocation: &'a Invocation<'a>,
        next: Next<'a>,
    ) -> Result<Returned, Error> {
        if !invocation.action.transactional {
            return next.await;
        }
        let cx = invocation.context;
        let Some(_flag) = cx.enter_transaction() else {
            return next.await;
        };

        let scope = cx.scope();
        let call = cx.id();
        let target = invocation.target();

        self.database.begin_transaction(scope).await?;
        debug!(%call, target = %target, "begin transaction");

        match next.await {
            Ok(returned) => {
                if let Err(e) = self.database.commit_transaction(scope).await {
                    error!(%call, target = %target, error = %e, "commit transaction failure");
                    return Err(Error::TransactionFailure {
                        message: format!("commit of {} failed", target),
                        cause: None,
                        source: Box::new(e),
                    });
                }
                debug!(%call, target = %target, "commit transaction");
                Ok(returned)
            }
            Err(cause) => match self.database.rollback_transaction(scope).await {
                Ok(()) => {
                    debug!(%call, target = %target, error = %cause, "rollback transaction");
                    Err(cause)
                }
                Err(e) => {
                    error!(%call, target = %target, error = %e, cause = %cause, "rollback transaction failure");
                    Err(Error::TransactionFailure {
                        message: format!("rollback of {} failed", target),
                        cause: Some(Box::new(cause)),
                        source: Box::new(e),
                    })
                }
            },
        }
    }
}

impl std::fmt::Debug for TransactionInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionInterceptor")
            .field("database", &self.database)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{ActionMeta, InterceptorChain};
    use crate::{CallContext, Param};
    use serde_json::json;
    use std::sync::Arc;
    use trellis_data::{BoxError, Connection, ConnectionSource, MemoryDatabase, Row};

    const TX: ActionMeta = ActionMeta {
        name: "save",
        transactional: true,
    };
    const PLAIN: ActionMeta = ActionMeta {
        name: "read",
        transactional: false,
    };

    fn chain(db: &MemoryDatabase) -> InterceptorChain {
        InterceptorChain::new(vec![Arc::new(TransactionInterceptor::new(Database::from_source(
            db.clone(),
        )))])
    }

    async fn run(
        chain: &InterceptorChain,
        db: &Database,
        cx: &CallContext,
        meta: &ActionMeta,
        fail: bool,
    ) -> Result<Returned, Error> {
        let param = Param::default();
        let invocation = Invocation {
            component: "OrderService",
            action: meta,
            param: &param,
            context: cx,
        };
        let terminal: Next<'_> = Box::pin(async move {
            assert!(cx.in_transaction() == meta.transactional);
            db.insert(cx.scope(), "orders", json!({"amount": 1}).as_object().unwrap())
                .await?;
            if fail {
                return Err(Error::BadRequest("rejected".into()));
            }
            Ok(Box::new(()) as Returned)
        });
        chain.run(&invocation, terminal).await
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let memory = MemoryDatabase::new().with_table("orders");
        let db = Database::from_source(memory.clone());
        let chain = chain(&memory);
        let cx = CallContext::new();

        run(&chain, &db, &cx, &TX, false).await.unwrap();

        assert_eq!(memory.begins(), 1);
        assert_eq!(memory.commits(), 1);
        assert_eq!(memory.rows("orders").len(), 1);
        assert!(!cx.in_transaction());
        assert!(!cx.scope().is_associated().await);
    }

    #[tokio::test]
    async fn test_rollback_reraises_original_error() {
        let memory = MemoryDatabase::new().with_table("orders");
        let db = Database::from_source(memory.clone());
        let chain = chain(&memory);
        let cx = CallContext::new();

        let err = run(&chain, &db, &cx, &TX, true).await.unwrap_err();

        assert!(matches!(err, Error::BadRequest(m) if m == "rejected"));
        assert_eq!(memory.rollbacks(), 1);
        assert_eq!(memory.commits(), 0);
        assert!(memory.rows("orders").is_empty());
        assert!(!cx.in_transaction());
    }

    #[tokio::test]
    async fn test_unmarked_action_passes_through() {
        let memory = MemoryDatabase::new().with_table("orders");
        let db = Database::from_source(memory.clone());
        let chain = chain(&memory);
        let cx = CallContext::new();

        run(&chain, &db, &cx, &PLAIN, false).await.unwrap();

        assert_eq!(memory.begins(), 0);
        assert_eq!(memory.rows("orders").len(), 1);
        assert!(cx.scope().is_associated().await);
    }

    #[tokio::test]
    async fn test_open_transaction_is_reused() {
        let memory = MemoryDatabase::new().with_table("orders");
        let db = Database::from_source(memory.clone());
        let chain = chain(&memory);
        let cx = CallContext::new();

        let _outer = cx.enter_transaction().unwrap();
        let param = Param::default();
        let invocation = Invocation {
            component: "OrderService",
            action: &TX,
            param: &param,
            context: &cx,
        };
        let terminal: Next<'_> = Box::pin(async { Ok(Box::new(()) as Returned) });
        chain.run(&invocation, terminal).await.unwrap();

        assert_eq!(memory.begins(), 0);
        assert!(cx.in_transaction());
    }

    #[tokio::test]
    async fn test_flag_cleared_when_call_is_cancelled() {
        let memory = MemoryDatabase::new().with_table("orders");
        let chain = chain(&memory);
        let cx = CallContext::new();
        let param = Param::default();
        let invocation = Invocation {
            component: "OrderService",
            action: &TX,
            param: &param,
            context: &cx,
        };
        let terminal: Next<'_> = Box::pin(std::future::pending());

        let mut call = tokio_test::task::spawn(chain.run(&invocation, terminal));
        assert!(call.poll().is_pending());
        assert!(cx.in_transaction());
        drop(call);

        assert!(!cx.in_transaction());
        assert!(memory.commits() == 0 && memory.rollbacks() == 0);
    }

    struct BrokenCommit;

    struct BrokenConnection;

    #[async_trait]
    impl Connection for BrokenConnection {
        async fn query(&mut self, _: &str, _: &[serde_json::Value]) -> Result<Vec<Row>, BoxError> {
            Ok(Vec::new())
        }
        async fn execute(&mut self, _: &str, _: &[serde_json::Value]) -> Result<u64, BoxError> {
            Ok(1)
        }
        async fn begin(&mut self) -> Result<(), BoxError> {
            Ok(())
        }
        async fn commit(&mut self) -> Result<(), BoxError> {
            Err("commit refused".into())
        }
        async fn rollback(&mut self) -> Result<(), BoxError> {
            Err("rollback refused".into())
        }
    }

    #[async_trait]
    impl ConnectionSource for BrokenCommit {
        async fn acquire(&self) -> Result<Box<dyn Connection>, BoxError> {
            Ok(Box::new(BrokenConnection))
        }
    }

    #[tokio::test]
    async fn test_commit_and_rollback_failures() {
        let db = Database::from_source(BrokenCommit);
        let chain = InterceptorChain::new(vec![Arc::new(TransactionInterceptor::new(db.clone()))]);
        let param = Param::default();

        let cx = CallContext::new();
        let invocation = Invocation {
            component: "OrderService",
            action: &TX,
            param: &param,
            context: &cx,
        };
        let ok: Next<'_> = Box::pin(async { Ok(Box::new(()) as Returned) });
        let err = chain.run(&invocation, ok).await.unwrap_err();
        assert!(matches!(err, Error::TransactionFailure { cause: None, .. }));

        let failed: Next<'_> = Box::pin(async { Err(Error::BadRequest("bad".into())) });
        let err = chain.run(&invocation, failed).await.unwrap_err();
        match err {
            Error::TransactionFailure { cause: Some(cause), source, .. } => {
                assert!(matches!(*cause, Error::BadRequest(_)));
                assert!(source.to_string().contains("rollback refused"));
            }
            other => panic!("expected transaction failure, got {:?}", other),
        }
        assert!(!cx.in_transaction());
    }
}
