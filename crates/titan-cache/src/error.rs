use thiserror::Error;

/// Failures inside the cache layer. None of these fail the intercepted call;
/// they only opt it out of caching.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot derive cache key for '{operation}': {source}")]
    KeyDerivation {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize result for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cached value for '{key}' does not match the expected type: {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
