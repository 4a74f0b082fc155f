//! Error types for session record operations.

/// Error type for session record operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying attribute store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Stored attributes could not be interpreted as a session record.
    #[error("Malformed session record: {0}")]
    MalformedRecord(String),

    /// The encoded payload needs more chunks than an ordinal can address.
    #[error("Session payload too large: {chunks} chunks needed, at most {max} allowed")]
    PayloadTooLarge { chunks: usize, max: usize },

    /// Deflate compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(#[source] std::io::Error),

    /// Options failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Build a malformed-record error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }
}

/// Result type for session record operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by an [`AttributeStore`](crate::AttributeStore).
///
/// The two conditional-write outcomes are kept apart from every other
/// failure because the lock protocol branches on them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The expected attribute exists but holds a different value.
    #[error("Conditional check failed: {0}")]
    ConditionalCheckFailed(String),

    /// The expected attribute does not exist on the item.
    #[error("Attribute does not exist: {0}")]
    AttributeDoesNotExist(String),

    /// Transport-level failure talking to the store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store rejected the request.
    #[error("Service error ({status}) {code}: {message}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Error code reported by the service.
        code: String,
        /// Human readable message.
        message: String,
    },

    /// The store answered with something we could not parse.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The client is misconfigured.
    #[error("Store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True when a conditional write lost against another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConditionalCheckFailed(_))
    }

    /// True when a conditional write targeted an attribute that is not there.
    pub fn is_missing_target(&self) -> bool {
        matches!(self, StoreError::AttributeDoesNotExist(_))
    }
}

/// Result type for attribute store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
