//! Error types for cached query execution
//!
//! Three layers of errors live here:
//! - [`FetchError`]: how a producer classifies its own failure
//! - [`CacheError`]: failures of the cache backend itself (never shown to `query` callers)
//! - [`QueryError`]: what callers of the query facade observe

use crate::retry::RetryError;
use thiserror::Error;

/// Failure reported by a producer (origin data service, AI chat, write path)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network-style failure that may succeed on another attempt
    #[error("Transient error: {0}")]
    Transient(String),

    /// Producer did not answer within the configured timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Malformed query or upstream rejection; retrying cannot help
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// The requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl FetchError {
    /// Whether the retry policy may attempt the producer again
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Timeout { .. })
    }
}

/// Failure of the cache backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backing store could not be reached or is in a broken state
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded into or decoded from the cache
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Classified error returned by the query facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Producer failed with an error that is not retried
    #[error("Fetch failed: {0}")]
    Fetch(#[source] FetchError),

    /// Every allowed attempt failed with a transient error
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: FetchError,
    },

    /// Descriptor does not name a known operation or has the wrong arity
    #[error("Invalid query descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl QueryError {
    /// True when the failure came from running out of retry attempts
    pub fn is_exhausted(&self) -> bool {
        matches!(self, QueryError::RetriesExhausted { .. })
    }

    /// True when the producer reported the entity as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::Fetch(FetchError::NotFound(_)))
    }

    /// The underlying producer error, if this error came from a fetch
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            QueryError::Fetch(e) => Some(e),
            QueryError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl From<RetryError<FetchError>> for QueryError {
    fn from(e: RetryError<FetchError>) -> Self {
        match e {
            RetryError::Exhausted { attempts, last } => QueryError::RetriesExhausted { attempts, last },
            RetryError::NonRetryable { error, .. } => QueryError::Fetch(error),
        }
    }
}

/// Result type alias for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = FetchError::Transient("connection reset".to_string());
        assert_eq!(error.to_string(), "Transient error: connection reset");

        let timeout_error = FetchError::Timeout {
            timeout_ms: 5000,
            context: "view.character.thị mầu".to_string(),
        };
        assert!(timeout_error.to_string().contains("timed out after 5000ms"));

        let exhausted = QueryError::RetriesExhausted {
            attempts: 3,
            last: FetchError::Transient("503".to_string()),
        };
        assert!(exhausted.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Transient("x".into()).is_transient());
        assert!(FetchError::Timeout { timeout_ms: 1, context: String::new() }.is_transient());
        assert!(!FetchError::Permanent("x".into()).is_transient());
        assert!(!FetchError::NotFound("x".into()).is_transient());

        assert!(CacheError::Unavailable("down".into()).is_transient());
        assert!(!CacheError::Serialization("bad".into()).is_transient());
    }

    #[test]
    fn test_retry_error_conversion() {
        let exhausted: QueryError = RetryError::Exhausted {
            attempts: 2,
            last: FetchError::Transient("reset".into()),
        }
        .into();
        assert!(exhausted.is_exhausted());

        let rejected: QueryError = RetryError::NonRetryable {
            attempt: 1,
            error: FetchError::NotFound("Xúy Vân".into()),
        }
        .into();
        assert!(!rejected.is_exhausted());
        assert!(rejected.is_not_found());
        assert_eq!(rejected.fetch_error(), Some(&FetchError::NotFound("Xúy Vân".into())));
    }
}
