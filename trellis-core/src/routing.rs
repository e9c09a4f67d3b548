// Route table mapping method + path to component actions

use crate::interceptor::{ActionMeta, BoxFuture};
use crate::{Action, ActionResult, CallContext, Container, Error, HttpMethod, Param};
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error};

/// Calls a bound action through the container's proxy for its component.
trait RouteInvoker: Send + Sync {
    fn invoke<'a>(
        &'a self,
        container: &'a Container,
        cx: &'a CallContext,
        param: &'a Param,
    ) -> BoxFuture<'a, Result<ActionResult, Error>>;
}

struct Bound<T>(Action<T>);

impl<T: Send + Sync + 'static> RouteInvoker for Bound<T> {
    fn invoke<'a>(
        &'a self,
        container: &'a Container,
        cx: &'a CallContext,
        param: &'a Param,
    ) -> BoxFuture<'a, Result<ActionResult, Error>> {
        Box::pin(async move { container.proxy::<T>()?.call(&self.0, cx, param).await })
    }
}

/// What a route resolves to: the owning component, the action and its
/// transaction marker.
#[derive(Clone)]
pub struct HandlerDescriptor {
    component: TypeId,
    component_name: &'static str,
    action: ActionMeta,
    takes_param: bool,
    invoker: Arc<dyn RouteInvoker>,
}

impl HandlerDescriptor {
    pub fn new<T: Send + Sync + 'static>(action: Action<T>) -> Self {
        Self {
            component: TypeId::of::<T>(),
            component_name: type_name::<T>(),
            action: *action.meta(),
            takes_param: action.takes_param(),
            invoker: Arc::new(Bound(action)),
        }
    }

    pub fn component(&self) -> TypeId {
        self.component
    }

    pub fn component_name(&self) -> &'static str {
        self.component_name
    }

    pub fn action(&self) -> &ActionMeta {
        &self.action
    }

    pub fn is_transactional(&self) -> bool {
        self.action.transactional
    }

    pub fn takes_param(&self) -> bool {
        self.takes_param
    }

    /// Run the action through the interceptor chain.
    pub fn invoke<'a>(
        &'a self,
        container: &'a Container,
        cx: &'a CallContext,
        param: &'a Param,
    ) -> BoxFuture<'a, Result<ActionResult, Error>> {
        self.invoker.invoke(container, cx, param)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("component", &self.component_name)
            .field("action", &self.action.name)
            .field("transactional", &self.action.transactional)
            .finish()
    }
}

/// Exact-match route table, built once at startup.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<(HttpMethod, String), HandlerDescriptor>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `method path` to `descriptor`; each pair can be bound once.
    pub fn register(&mut self, method: HttpMethod, path: &str, descriptor: HandlerDescriptor) -> Result<(), Error> {
        let path = normalize_path(path);
        if self.routes.contains_key(&(method, path.clone())) {
            error!(%method, path = %path, "Route registered twice");
            return Err(Error::AmbiguousRoute(format!("{} {}", method, path)));
        }

        debug!(
            %method,
            path = %path,
            component = descriptor.component_name,
            action = descriptor.action.name,
            transactional = descriptor.action.transactional,
            "Route registered"
        );
        self.routes.insert((method, path), descriptor);
        Ok(())
    }

    /// Register every route declared by controller `C`.
    pub fn mount<C: Controller>(&mut self) -> Result<(), Error> {
        let mut registrar = RouteRegistrar {
            table: self,
            base: normalize_path(C::base_path()),
            error: None,
            _controller: PhantomData,
        };
        C::routes(&mut registrar);
        match registrar.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Find the descriptor for a request line. Unknown methods never match.
    pub fn resolve(&self, method: &str, path: &str) -> Option<&HandlerDescriptor> {
        let method = HttpMethod::from_str(method)?;
        self.routes.get(&(method, normalize_path(path)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered `(method, path)` pairs, sorted by path then method.
    pub fn routes(&self) -> Vec<(HttpMethod, &str)> {
        let mut routes: Vec<_> = self
            .routes
            .keys()
            .map(|(method, path)| (*method, path.as_str()))
            .collect();
        routes.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        routes
    }
}

/// Normalize a request path: leading `/`, no trailing `/` except for the
/// root, query string removed.
pub fn normalize_path(path: &str) -> String {
    let path = path.split_once('?').map_or(path, |(p, _)| p).trim();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// A component whose actions are reachable over HTTP.
pub trait Controller: Send + Sync + Sized + 'static {
    /// Prefix for every route of this controller.
    fn base_path() -> &'static str {
        "/"
    }

    /// Declare the routes of this controller.
    fn routes(routes: &mut RouteRegistrar<'_, Self>);
}

/// Route declarations for controller `C`.
///
/// The first failed registration is reported by [`RouteTable::mount`].
pub struct RouteRegistrar<'t, C> {
    table: &'t mut RouteTable,
    base: String,
    error: Option<Error>,
    _controller: PhantomData<fn() -> C>,
}

impl<C: Controller> RouteRegistrar<'_, C> {
    pub fn route(&mut self, method: HttpMethod, path: &str, action: Action<C>) -> &mut Self {
        if self.error.is_none() {
            let full = join(&self.base, path);
            if let Err(e) = self.table.register(method, &full, HandlerDescriptor::new(action)) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn get(&mut self, path: &str, action: Action<C>) -> &mut Self {
        self.route(HttpMethod::GET, path, action)
    }

    pub fn post(&mut self, path: &str, action: Action<C>) -> &mut Self {
        self.route(HttpMethod::POST, path, action)
    }

    pub fn put(&mut self, path: &str, action: Action<C>) -> &mut Self {
        self.route(HttpMethod::PUT, path, action)
    }

    pub fn delete(&mut self, path: &str, action: Action<C>) -> &mut Self {
        self.route(HttpMethod::DELETE, path, action)
    }

    pub fn patch(&mut self, path: &str, action: Action<C>) -> &mut Self {
        self.route(HttpMethod::PATCH, path, action)
    }
}

fn join(base: &str, path: &str) -> String {
    if base == "/" {
        return path.to_string();
    }
    format!("{}/{}", base, path.trim_start_matches('/'))
}
