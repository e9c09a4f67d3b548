// Trellis - a component-oriented web framework for Rust
//
// Components live in a container, controller actions are bound to routes,
// and every call runs through an interceptor chain that can wrap it in a
// declarative transaction.

// Re-export core functionality
pub use trellis_core::*;

// Configuration and data access
pub use trellis_config as config;
pub use trellis_data as data;

pub use trellis_config::FrameworkConfig;
pub use trellis_data::{Database, FieldMap, MemoryDatabase};

#[cfg(feature = "sqlite")]
pub use trellis_data::SqliteSource;

// Re-export so applications do not need their own dependency for it
pub use async_trait::async_trait;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Action,
        ActionResult,
        Application,
        BoxFuture,
        CallContext,
        Component,
        Container,
        Controller,
        Data,
        Database,
        Error,
        FieldMap,
        FileParam,
        FrameworkConfig,
        HttpMethod,
        Interceptor,
        Invocation,
        Next,
        Outcome,
        Param,
        Request,
        Returned,
        RouteRegistrar,
        View,
        async_trait,
    };
}
