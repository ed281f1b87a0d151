//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

fn validate_key(key: &str) -> Option<String> {
    if key.trim().is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    None
}

/// Request body for PUT /cache
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value; arrays and objects are kept as lists and maps
/// - `ttl`: TTL in seconds; zero or absent means the backend default
/// - `nx`: Only store when the key is absent
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub nx: bool,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for POST /incr
#[derive(Debug, Clone, Deserialize)]
pub struct IncrRequest {
    pub key: String,
    /// Step to add; negative steps count down
    #[serde(default = "default_amount")]
    pub amount: i64,
    /// Re-applied on every call when positive
    #[serde(default)]
    pub ttl: Option<i64>,
    /// Starting value for an absent key
    #[serde(default)]
    pub default: Option<i64>,
}

fn default_amount() -> i64 {
    1
}

impl IncrRequest {
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for POST /lock
#[derive(Debug, Clone, Deserialize)]
pub struct LockRequest {
    pub key: String,
    /// Token stored under the lock
    #[serde(default = "default_token")]
    pub value: String,
    /// Lock lifetime in seconds; zero or absent means the lock default
    #[serde(default)]
    pub ttl: i64,
}

fn default_token() -> String {
    "1".to_string()
}

impl LockRequest {
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Query string for GET /keys
#[derive(Debug, Clone, Deserialize)]
pub struct KeysQuery {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "*".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"key": "test", "value": "hello"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "test");
        assert_eq!(req.value, json!("hello"));
        assert_eq!(req.ttl, 0);
        assert!(!req.nx);
    }

    #[test]
    fn test_set_request_structured_value() {
        let json = r#"{"key": "test", "value": {"a": [1, 2]}, "ttl": 60, "nx": true}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.value, json!({"a": [1, 2]}));
        assert_eq!(req.ttl, 60);
        assert!(req.nx);
    }

    #[test]
    fn test_validate_empty_key() {
        let req: SetRequest = serde_json::from_str(r#"{"key": "  ", "value": 1}"#).unwrap();
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_incr_request_defaults() {
        let req: IncrRequest = serde_json::from_str(r#"{"key": "hits"}"#).unwrap();
        assert_eq!(req.amount, 1);
        assert!(req.ttl.is_none());
        assert!(req.default.is_none());
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_lock_request_defaults() {
        let req: LockRequest = serde_json::from_str(r#"{"key": "job"}"#).unwrap();
        assert_eq!(req.value, "1");
        assert_eq!(req.ttl, 0);
    }

    #[test]
    fn test_keys_query_default_pattern() {
        let query: KeysQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.pattern, "*");
    }
}
