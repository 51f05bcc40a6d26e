use thiserror::Error;

/// Errors produced by the response cache.
///
/// On the request path every variant degrades to a miss; only
/// [`CacheError::Config`] and connection failures during
/// [`ResponseCache::configure`](super::ResponseCache::configure) reach the
/// caller as hard errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cached entry could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed duration: {input:?}")]
    MalformedDuration { input: String },

    #[error("invalid cache configuration: {message}")]
    Config { message: String },
}

impl CacheError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
