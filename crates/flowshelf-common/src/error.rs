//! Common error types used throughout flowshelf.
//!
//! Storage, validation and lookup failures all flow through one error type so
//! repository errors can bubble unmodified into the lifecycle layer.

/// Common error type for flowshelf.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested blob, variant, or association was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An upload was rejected before any storage I/O.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A storage read or write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Image decoding or encoding failed.
    #[error("Image error: {0}")]
    Image(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new Storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new Image error.
    pub fn image<S: Into<String>>(msg: S) -> Self {
        Self::Image(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller may reasonably retry the failed operation.
    ///
    /// Storage failures roll their transaction back, so retrying is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
