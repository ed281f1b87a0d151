//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror. Expected outcomes such as a
//! held lock, an absent key or a full shard are reported through `Ok(false)` /
//! `Ok(None)`; only unexpected conditions surface here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data or arguments
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The remote store is unreachable or answered with a protocol error
    #[error("Remote store error: {0}")]
    Transport(#[from] redis::RedisError),

    /// A counter operation hit a value that is not an integer
    #[error("Value is not an integer: {0}")]
    NotInteger(String),

    /// Operation against a key holding the wrong kind of value
    #[error("Wrong value type for key: {0}")]
    WrongType(String),

    /// Envelope encoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A counter could not be stored because its shard stayed full
    #[error("No room left in shard: {0}")]
    Capacity(String),

    /// A single-flight waiter gave up on a held lock
    #[error("Timed out waiting for lock: {0}")]
    LockTimeout(String),

    /// A value producer failed
    #[error("Producer failed: {0}")]
    Producer(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_)
            | CacheError::NotInteger(_)
            | CacheError::WrongType(_) => StatusCode::BAD_REQUEST,
            CacheError::LockTimeout(_) => StatusCode::CONFLICT,
            CacheError::Capacity(_) => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Serialization(_)
            | CacheError::Producer(_)
            | CacheError::Config(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let resp = CacheError::NotFound("k".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = CacheError::NotInteger("k".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = CacheError::LockTimeout("k".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::WrongType("user:1".into());
        assert_eq!(err.to_string(), "Wrong value type for key: user:1");
    }
}
