// Error types for the Trellis framework

use trellis_data::{BoxError, DataError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Ambiguous route: {0} is already registered")]
    AmbiguousRoute(String),

    #[error("Component not registered: {0}")]
    NotRegistered(&'static str),

    #[error("Component registered twice: {0}")]
    DuplicateComponent(&'static str),

    #[error("Failed to construct {component}: {source}")]
    Construction {
        component: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Parameter `{field}` expected {expected}, got `{value}`")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        value: String,
    },

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Upload stream for `{0}` was already consumed")]
    StreamConsumed(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Transaction failure: {message}")]
    TransactionFailure {
        message: String,
        /// Error that made the transaction roll back, if any.
        cause: Option<Box<Error>>,
        #[source]
        source: BoxError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) => 404,
            Error::TypeMismatch { .. } | Error::BadRequest(_) | Error::StreamConsumed(_) => 400,
            Error::Data(e) if e.is_empty_payload() => 400,
            Error::PayloadTooLarge(_) => 413,
            _ => 500,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Wrap an error raised while building `component`.
    pub fn construction(component: &'static str, source: Error) -> Self {
        Error::Construction {
            component,
            source: Box::new(source),
        }
    }

    pub(crate) fn type_mismatch(field: &str, expected: &'static str, value: &str) -> Self {
        Error::TypeMismatch {
            field: field.to_string(),
            expected,
            value: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result alias for framework operations.
pub type Result<T> = std::result::Result<T, Error>;
