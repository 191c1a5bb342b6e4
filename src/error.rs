//! Error types for normalization, storage and hydration.
//!
//! Two layers:
//! - [`NormalizeError`]: raised by the traversal engine for a single value
//! - [`HydrateError`]: everything that crosses the crate boundary

use thiserror::Error;

use crate::value::Value;

/// Boxed error used for failures raised by caller-supplied hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while converting a value into plain data.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A container was reached again while one of its ancestors was still
    /// being traversed.
    ///
    /// Never escapes [`crate::normalize::normalize`]: it is rewrapped as
    /// [`NormalizeError::Unsupported`] with this error as its cause.
    #[error("cyclic reference: {value:?}")]
    CyclicReference { value: Value },

    /// The value (or what its conversion hook produced) has no plain-data form.
    #[error("unsupported value: {value:?}")]
    Unsupported {
        value: Value,
        #[source]
        cause: Option<BoxError>,
    },
}

impl NormalizeError {
    /// Create an unsupported error without a cause.
    pub fn unsupported(value: Value) -> Self {
        Self::Unsupported { value, cause: None }
    }

    /// Create an unsupported error caused by `cause`.
    pub fn unsupported_with(value: Value, cause: impl Into<BoxError>) -> Self {
        Self::Unsupported {
            value,
            cause: Some(cause.into()),
        }
    }

    /// The value the error was raised for.
    pub fn value(&self) -> &Value {
        match self {
            Self::CyclicReference { value } | Self::Unsupported { value, .. } => value,
        }
    }

    /// Returns true if this error was caused, directly or not, by a cycle.
    pub fn is_cyclic(&self) -> bool {
        match self {
            Self::CyclicReference { .. } => true,
            Self::Unsupported { cause, .. } => cause
                .as_ref()
                .and_then(|c| c.downcast_ref::<NormalizeError>())
                .is_some_and(NormalizeError::is_cyclic),
        }
    }
}

/// Errors that can occur while hydrating or persisting state.
#[derive(Debug, Error)]
pub enum HydrateError {
    /// State could not be normalized.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// Hydration was requested before any storage was configured.
    #[error("storage backend not configured")]
    BackendNotConfigured,

    /// The backend failed a write, delete, clear or close.
    #[error("backend operation failed: {0}")]
    BackendOperationFailed(String),

    /// The storage handle was closed.
    #[error("storage is closed")]
    BackendClosed,

    /// Invalid key format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Persisted data could not be turned back into state.
    #[error("reconstruction failed: {0}")]
    Reconstruction(String),

    /// Invalid storage configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A hydrated holder was created outside a tokio runtime.
    #[error("no tokio runtime available for background writes")]
    NoRuntime,
}

/// Result type alias for hydration operations.
pub type Result<T> = std::result::Result<T, HydrateError>;

impl HydrateError {
    /// Wrap a lower-level backend failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::BackendOperationFailed(err.to_string())
    }

    /// Returns true if the error must reach the caller even where other
    /// failures are only reported.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HydrateError::BackendNotConfigured)
    }
}

impl From<serde_json::Error> for HydrateError {
    fn from(err: serde_json::Error) -> Self {
        HydrateError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = HydrateError::InvalidKey("empty".to_string());
        assert!(err.to_string().contains("invalid key"));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_unsupported_carries_cause() {
        let cyclic = NormalizeError::CyclicReference { value: Value::Null };
        let err = NormalizeError::unsupported_with(Value::Int(1), cyclic);

        assert!(err.is_cyclic());
        let source = err.source().unwrap();
        assert!(source.to_string().contains("cyclic reference"));
    }

    #[test]
    fn test_unsupported_without_cause() {
        let err = NormalizeError::unsupported(Value::Float(f64::NAN));
        assert!(!err.is_cyclic());
        assert!(err.source().is_none());
        assert!(matches!(err.value(), Value::Float(f) if f.is_nan()));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(HydrateError::BackendNotConfigured.is_fatal());
        assert!(!HydrateError::BackendClosed.is_fatal());
        assert!(!HydrateError::backend("disk full").is_fatal());
        assert!(!HydrateError::from(NormalizeError::unsupported(Value::Null)).is_fatal());
    }

    #[test]
    fn test_normalize_error_is_transparent() {
        let err: HydrateError = NormalizeError::unsupported(Value::Null).into();
        assert!(err.to_string().starts_with("unsupported value"));
    }
}
