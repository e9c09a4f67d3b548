// Component container

use crate::interceptor::{Interceptor, InterceptorChain};
use crate::{Error, Proxy};
use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// A type the container can build on its own.
///
/// `create` may resolve components registered before it.
pub trait Component: Send + Sync + Sized + 'static {
    fn create(container: &Container) -> Result<Self, Error>;
}

type Factory = Box<dyn FnOnce(&Container) -> Result<Arc<dyn Any + Send + Sync>, Error> + Send>;

struct Registration {
    type_id: TypeId,
    name: &'static str,
    factory: Factory,
}

/// Collects registrations and interceptors; [`build`](Self::build) runs once.
#[derive(Default)]
pub struct ContainerBuilder {
    registrations: Vec<Registration>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build `T` with [`Component::create`].
    pub fn register<T: Component>(self) -> Self {
        self.register_with(T::create)
    }

    /// Build `T` with a custom factory.
    pub fn register_with<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Container) -> Result<T, Error> + Send + 'static,
    {
        trace!(component = type_name::<T>(), "Queued component");
        self.registrations.push(Registration {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            factory: Box::new(move |c: &Container| {
                factory(c).map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>)
            }),
        });
        self
    }

    /// Register an already-built value.
    pub fn instance<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.instance_arc(Arc::new(value))
    }

    pub fn instance_arc<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.registrations.push(Registration {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            factory: Box::new(move |_: &Container| Ok(value as Arc<dyn Any + Send + Sync>)),
        });
        self
    }

    /// Append an interceptor; the first appended runs outermost.
    pub fn interceptor(self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptor_arc(Arc::new(interceptor))
    }

    pub fn interceptor_arc(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Append every registration and interceptor of `other`.
    pub(crate) fn append(mut self, other: ContainerBuilder) -> Self {
        self.registrations.extend(other.registrations);
        self.interceptors.extend(other.interceptors);
        self
    }

    /// Construct every component in registration order.
    ///
    /// Stops at the first failing factory.
    pub fn build(self) -> Result<Container, Error> {
        let mut seen = HashSet::new();
        for registration in &self.registrations {
            if !seen.insert(registration.type_id) {
                error!(component = registration.name, "Component registered twice");
                return Err(Error::DuplicateComponent(registration.name));
            }
        }

        let mut container = Container {
            components: HashMap::with_capacity(self.registrations.len()),
            chain: Arc::new(InterceptorChain::new(self.interceptors)),
        };

        for Registration { type_id, name, factory } in self.registrations {
            trace!(component = name, "Constructing component");
            let instance = factory(&container).map_err(|e| {
                error!(component = name, error = %e, "Component construction failed");
                Error::construction(name, e)
            })?;
            container.components.insert(type_id, Entry { name, instance });
            debug!(component = name, "Component registered in container");
        }

        debug!(
            components = container.components.len(),
            interceptors = container.chain.len(),
            "Container built"
        );
        Ok(container)
    }
}

struct Entry {
    name: &'static str,
    instance: Arc<dyn Any + Send + Sync>,
}

/// Singleton components keyed by type, plus the interceptor chain shared by
/// every proxy. Read-only after build, except for [`replace`](Self::replace).
pub struct Container {
    components: HashMap<TypeId, Entry>,
    chain: Arc<InterceptorChain>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Resolve the singleton for `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        self.components
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(&entry.instance).downcast::<T>().ok())
            .ok_or_else(|| {
                trace!(component = type_name::<T>(), "Component not found in container");
                Error::NotRegistered(type_name::<T>())
            })
    }

    /// Swap the singleton for `T`, returning the previous one.
    ///
    /// Proxies obtained earlier keep the previous instance.
    pub fn replace<T: Send + Sync + 'static>(&mut self, instance: T) -> Result<Arc<T>, Error> {
        let entry = self
            .components
            .get_mut(&TypeId::of::<T>())
            .ok_or(Error::NotRegistered(type_name::<T>()))?;
        let previous = std::mem::replace(&mut entry.instance, Arc::new(instance));
        debug!(component = entry.name, "Component replaced");
        previous
            .downcast::<T>()
            .map_err(|_| Error::Internal(format!("stored component is not a {}", type_name::<T>())))
    }

    /// The singleton for `T` wrapped by the interceptor chain.
    pub fn proxy<T: Send + Sync + 'static>(&self) -> Result<Proxy<T>, Error> {
        Ok(Proxy::new(self.get::<T>()?, Arc::clone(&self.chain)))
    }

    pub fn chain(&self) -> &Arc<InterceptorChain> {
        &self.chain
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Type names of every registered component.
    pub fn component_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.components.values().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("components", &self.component_names())
            .field("chain", &self.chain)
            .finish()
    }
}
