// Application bootstrapper and request dispatch

use crate::container::{Component, ContainerBuilder};
use crate::interceptor::Interceptor;
use crate::param::ParamBinder;
use crate::routing::{Controller, RouteTable, normalize_path};
use crate::transaction::TransactionInterceptor;
use crate::{ActionResult, CallContext, Container, Error, Outcome, Request};
use bytes::Bytes;
use trellis_config::FrameworkConfig;
use trellis_data::Database;
use tracing::{Instrument, debug, info, info_span, trace, warn};

type Mount = fn(&mut RouteTable) -> Result<(), Error>;

/// Collects configuration, components, controllers and interceptors.
pub struct ApplicationBuilder {
    config: FrameworkConfig,
    components: ContainerBuilder,
    mounts: Vec<Mount>,
    database: Option<Database>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config: FrameworkConfig::default(),
            components: ContainerBuilder::new(),
            mounts: Vec::new(),
            database: None,
        }
    }

    pub fn config(mut self, config: FrameworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Data layer used by transactional actions; also registered as a component.
    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Open the data source named by the configured driver.
    pub async fn connect_database(self) -> Result<Self, Error> {
        let database = trellis_data::open_source(&self.config.database).await?;
        Ok(self.database(database))
    }

    /// Append an interceptor. The transaction interceptor always runs inside
    /// every interceptor added here.
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.components = self.components.interceptor(interceptor);
        self
    }

    pub fn component<T: Component>(mut self) -> Self {
        self.components = self.components.register::<T>();
        self
    }

    pub fn component_with<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Container) -> Result<T, Error> + Send + 'static,
    {
        self.components = self.components.register_with(factory);
        self
    }

    pub fn instance<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.components = self.components.instance(value);
        self
    }

    /// Register `C` as a component and mount its routes.
    pub fn controller<C: Controller + Component>(self) -> Self {
        self.component::<C>().mount::<C>()
    }

    /// Mount the routes of `C`, registered separately as a component.
    pub fn mount<C: Controller>(mut self) -> Self {
        self.mounts.push(RouteTable::mount::<C>);
        self
    }

    /// Build the container, then the route table.
    pub fn build(self) -> Result<Application, Error> {
        let mut components = ContainerBuilder::new().instance(self.config.clone());
        if let Some(database) = &self.database {
            components = components.instance(database.clone());
        }
        components = components.append(self.components);
        if let Some(database) = self.database {
            components = components.interceptor(TransactionInterceptor::new(database));
        }
        let container = components.build()?;

        let mut routes = RouteTable::new();
        for mount in self.mounts {
            mount(&mut routes)?;
        }

        info!(
            components = container.len(),
            routes = routes.len(),
            interceptors = container.chain().len(),
            "Application bootstrap complete"
        );

        Ok(Application {
            binder: ParamBinder::from_config(&self.config.app),
            config: self.config,
            container,
            routes,
        })
    }
}

/// The dispatch front: resolves requests to actions and renders their results.
pub struct Application {
    config: FrameworkConfig,
    container: Container,
    routes: RouteTable,
    binder: ParamBinder,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Handle one request in a fresh [`CallContext`].
    ///
    /// The parameter bag is always bound, so a malformed body fails the
    /// request even for actions that take no parameters. Whether the action
    /// receives the bag is fixed by how it was declared: [`Action::new`]
    /// handlers get it, [`Action::bare`] handlers never do. An empty bag is
    /// still passed to an `Action::new` handler.
    ///
    /// [`Action::new`]: crate::Action::new
    /// [`Action::bare`]: crate::Action::bare
    pub async fn dispatch(&self, request: Request) -> Result<Outcome, Error> {
        let cx = CallContext::new();
        let span = info_span!(
            "dispatch",
            call = %cx.id(),
            method = %request.method,
            path = %request.path
        );
        self.dispatch_in(&cx, request).instrument(span).await
    }

    async fn dispatch_in(&self, cx: &CallContext, request: Request) -> Result<Outcome, Error> {
        let path = normalize_path(&request.path);
        if path == "/favicon.ico" {
            return Ok(Outcome::Empty);
        }

        let Some(descriptor) = self.routes.resolve(&request.method, &path) else {
            debug!("No route matched");
            return Err(Error::RouteNotFound(format!("{} {}", request.method, path)));
        };

        let param = self.binder.bind(&request)?;
        if !descriptor.takes_param() && !param.is_empty() {
            trace!(action = descriptor.action().name, "Action takes no parameters; bag ignored");
        }

        let result = descriptor
            .invoke(&self.container, cx, &param)
            .await
            .inspect_err(|e| warn!(action = descriptor.action().name, error = %e, "Action failed"))?;

        self.render(result)
    }

    fn render(&self, result: ActionResult) -> Result<Outcome, Error> {
        let outcome = match result {
            ActionResult::View(view) if view.path.is_empty() => Outcome::Empty,
            ActionResult::View(view) if view.path.starts_with('/') => Outcome::Redirect { location: view.path },
            ActionResult::View(view) => Outcome::Forward {
                template: format!("{}{}", self.config.app.view_path, view.path),
                model: view.model,
            },
            ActionResult::Data(data) if data.model.is_null() => Outcome::Empty,
            ActionResult::Data(data) => Outcome::Json(Bytes::from(serde_json::to_vec(&data.model)?)),
        };
        trace!(?outcome, "Rendered action result");
        Ok(outcome)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("container", &self.container)
            .field("routes", &self.routes.routes())
            .finish()
    }
}
