// Interceptors wrapping component action calls

use crate::{CallContext, Error, Param};
use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased action result travelling through the chain.
pub type Returned = Box<dyn Any + Send>;

/// Continuation of the chain: await to proceed, drop to short-circuit.
pub type Next<'a> = BoxFuture<'a, Result<Returned, Error>>;

/// Static description of an action entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionMeta {
    pub name: &'static str,
    /// Run inside a transaction.
    pub transactional: bool,
}

/// What an interceptor sees of the call it wraps.
pub struct Invocation<'a> {
    pub component: &'static str,
    pub action: &'a ActionMeta,
    pub param: &'a Param,
    pub context: &'a CallContext,
}

impl Invocation<'_> {
    /// `Component::action`, for log records.
    pub fn target(&self) -> String {
        let component = self.component.rsplit("::").next().unwrap_or(self.component);
        format!("{}::{}", component, self.action.name)
    }
}

/// Cross-cutting behavior around an action call
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Intercept the call before/after the action runs
    async fn intercept<'a>(
        &'a self,
        invocation: &'a Invocation<'a>,
        next: Next<'a>,
    ) -> Result<Returned, Error>;
}

/// Interceptors applied, in registration order, around every component call.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `terminal` wrapped by every interceptor; the first registered is
    /// outermost. `terminal` is moved into the chain, so it runs at most once.
    pub async fn run<'a>(&'a self, invocation: &'a Invocation<'a>, terminal: Next<'a>) -> Result<Returned, Error> {
        let chained = self
            .interceptors
            .iter()
            .rev()
            .fold(terminal, |next, interceptor| interceptor.intercept(invocation, next));
        chained.await
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

/// Logging interceptor
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept<'a>(
        &'a self,
        invocation: &'a Invocation<'a>,
        next: Next<'a>,
    ) -> Result<Returned, Error> {
        let start = std::time::Instant::now();
        let target = invocation.target();
        let call = invocation.context.id();

        debug!(%call, target = %target, transactional = invocation.action.transactional, "Calling action");

        let result = next.await;

        let duration = start.elapsed();
        match &result {
            Ok(_) => debug!(%call, target = %target, ?duration, "Action returned"),
            Err(e) => warn!(%call, target = %target, ?duration, error = %e, "Action failed"),
        }

        result
    }
}
