//! Error types for the data access layer.

use thiserror::Error;

/// Boxed driver-level failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the data access layer.
#[derive(Error, Debug)]
pub enum DataError {
    /// Insert or update attempted with no fields.
    #[error("cannot {operation} `{table}`: field map is empty")]
    EmptyPayload {
        /// Statement kind that was refused.
        operation: &'static str,
        /// Target table.
        table: String,
    },

    /// Underlying statement or connection failure.
    #[error("{operation} failure: {source}")]
    Access {
        /// What the layer was doing when the driver failed.
        operation: &'static str,
        /// Original driver error.
        #[source]
        source: BoxError,
    },

    /// Table or column name that cannot be spliced into a statement.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    /// Data source configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// Wrap a driver error.
    pub fn access(operation: &'static str, source: impl Into<BoxError>) -> Self {
        DataError::Access {
            operation,
            source: source.into(),
        }
    }

    /// True for [`DataError::EmptyPayload`].
    pub fn is_empty_payload(&self) -> bool {
        matches!(self, DataError::EmptyPayload { .. })
    }
}

/// Result type alias for data access operations.
pub type DataResult<T> = Result<T, DataError>;

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::access("read script", err)
    }
}
