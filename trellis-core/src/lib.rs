// Core library for the Trellis web framework
// Component container, route table, parameter binding, interception chain,
// transaction interceptor and the dispatch front.

pub mod application;
pub mod container;
pub mod context;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod logging;
pub mod multipart;
pub mod param;
pub mod proxy;
pub mod routing;
pub mod transaction;

// Re-export commonly used types
pub use application::*;
pub use container::*;
pub use context::*;
pub use error::*;
pub use http::*;
pub use interceptor::*;
pub use param::*;
pub use proxy::*;
pub use routing::*;
pub use transaction::*;
