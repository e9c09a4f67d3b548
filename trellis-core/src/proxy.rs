//! Intercepted access to component actions.
//!
//! An [`Action`] is a named, statically known entry point on a component,
//! optionally marked transactional. A [`Proxy`] pairs a component singleton
//! with the container's [`InterceptorChain`]; calling an action through it
//! runs every interceptor around exactly one call of the action body.
//!
//! ```rust,ignore
//! impl OrderService {
//!     pub const PLACE: Action<Self, Order> = Action::new("place", Self::place).transactional();
//!
//!     fn place<'a>(&'a self, cx: &'a CallContext, param: &'a Param) -> BoxFuture<'a, Result<Order>> {
//!         Box::pin(async move { /* ... */ })
//!     }
//! }
//!
//! let order = container.proxy::<OrderService>()?.call(&OrderService::PLACE, &cx, &param).await?;
//! ```

use crate::interceptor::{ActionMeta, BoxFuture, Invocation, InterceptorChain, Next, Returned};
use crate::{ActionResult, CallContext, Error, Param};
use std::sync::Arc;

/// Action body receiving the parameter bag.
pub type Handler<T, R> =
    for<'a> fn(&'a T, &'a CallContext, &'a Param) -> BoxFuture<'a, Result<R, Error>>;

/// Action body taking no parameters.
pub type BareHandler<T, R> = for<'a> fn(&'a T, &'a CallContext) -> BoxFuture<'a, Result<R, Error>>;

enum Body<T, R> {
    WithParam(Handler<T, R>),
    Bare(BareHandler<T, R>),
}

/// A named entry point on component `T` producing `R`.
pub struct Action<T, R = ActionResult> {
    meta: ActionMeta,
    body: Body<T, R>,
}

impl<T, R> Action<T, R> {
    pub const fn new(name: &'static str, handler: Handler<T, R>) -> Self {
        Self {
            meta: ActionMeta {
                name,
                transactional: false,
            },
            body: Body::WithParam(handler),
        }
    }

    /// Entry point that never looks at the request parameters.
    pub const fn bare(name: &'static str, handler: BareHandler<T, R>) -> Self {
        Self {
            meta: ActionMeta {
                name,
                transactional: false,
            },
            body: Body::Bare(handler),
        }
    }

    /// Mark the action as running inside a transaction.
    pub const fn transactional(mut self) -> Self {
        self.meta.transactional = true;
        self
    }

    pub fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    pub fn name(&self) -> &'static str {
        self.meta.name
    }

    pub fn takes_param(&self) -> bool {
        matches!(self.body, Body::WithParam(_))
    }

    fn invoke<'a>(&self, target: &'a T, cx: &'a CallContext, param: &'a Param) -> BoxFuture<'a, Result<R, Error>> {
        match self.body {
            Body::WithParam(handler) => handler(target, cx, param),
            Body::Bare(handler) => handler(target, cx),
        }
    }
}

impl<T, R> Clone for Action<T, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, R> Copy for Action<T, R> {}

impl<T, R> Clone for Body<T, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, R> Copy for Body<T, R> {}

impl<T, R> std::fmt::Debug for Action<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.meta.name)
            .field("transactional", &self.meta.transactional)
            .finish()
    }
}

/// A component singleton wrapped by the interceptor chain.
pub struct Proxy<T> {
    target: Arc<T>,
    chain: Arc<InterceptorChain>,
}

impl<T: Send + Sync + 'static> Proxy<T> {
    pub fn new(target: Arc<T>, chain: Arc<InterceptorChain>) -> Self {
        Self { target, chain }
    }

    /// The unwrapped singleton. Calls made on it bypass the interceptors.
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Call `action` through the interceptor chain.
    pub async fn call<R: Send + 'static>(
        &self,
        action: &Action<T, R>,
        cx: &CallContext,
        param: &Param,
    ) -> Result<R, Error> {
        let invocation = Invocation {
            component: std::any::type_name::<T>(),
            action: action.meta(),
            param,
            context: cx,
        };

        let target = &*self.target;
        let action = *action;
        let terminal: Next<'_> = Box::pin(async move {
            action
                .invoke(target, cx, param)
                .await
                .map(|r| Box::new(r) as Returned)
        });

        let returned = self.chain.run(&invocation, terminal).await?;
        returned.downcast::<R>().map(|r| *r).map_err(|_| {
            Error::Internal(format!(
                "interceptor substituted an incompatible value for {}",
                invocation.target()
            ))
        })
    }
}

impl<T> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            chain: Arc::clone(&self.chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::Interceptor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    impl Counter {
        const BUMP: Action<Self, usize> = Action::new("bump", Self::bump);
        const PEEK: Action<Self, usize> = Action::bare("peek", Self::peek).transactional();

        fn bump<'a>(&'a self, _cx: &'a CallContext, param: &'a Param) -> BoxFuture<'a, Result<usize, Error>> {
            Box::pin(async move {
                let by = param.get_long("by")?.unwrap_or(1) as usize;
                Ok(self.calls.fetch_add(by, Ordering::SeqCst) + by)
            })
        }

        fn peek<'a>(&'a self, _cx: &'a CallContext) -> BoxFuture<'a, Result<usize, Error>> {
            Box::pin(async move { Ok(self.calls.load(Ordering::SeqCst)) })
        }
    }

    struct Substitute;

    #[async_trait]
    impl Interceptor for Substitute {
        async fn intercept<'a>(
            &'a self,
            _invocation: &'a Invocation<'a>,
            next: Next<'a>,
        ) -> Result<Returned, Error> {
            next.await?;
            Ok(Box::new("not a number"))
        }
    }

    #[test]
    fn test_action_meta() {
        assert_eq!(Counter::BUMP.name(), "bump");
        assert!(!Counter::BUMP.meta().transactional);
        assert!(Counter::BUMP.takes_param());
        assert!(Counter::PEEK.meta().transactional);
        assert!(!Counter::PEEK.takes_param());
    }

    #[tokio::test]
    async fn test_call_without_interceptors() {
        let proxy = Proxy::new(Arc::new(Counter::default()), Arc::new(InterceptorChain::default()));
        let cx = CallContext::new();

        let param = Param::from_pairs([("by", "3")]);
        assert_eq!(proxy.call(&Counter::BUMP, &cx, &param).await.unwrap(), 3);
        assert_eq!(proxy.call(&Counter::PEEK, &cx, &param).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_incompatible_substitution() {
        let proxy = Proxy::new(
            Arc::new(Counter::default()),
            Arc::new(InterceptorChain::new(vec![Arc::new(Substitute)])),
        );
        let cx = CallContext::new();

        let err = proxy.call(&Counter::BUMP, &cx, &Param::default()).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        // The action still ran exactly once.
        assert_eq!(proxy.target().calls.load(Ordering::SeqCst), 1);
    }
}
