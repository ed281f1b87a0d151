//! API Handlers
//!
//! HTTP request handlers for each admin endpoint. Every handler goes through
//! the [`Cache`] contract, so the same surface fronts any backend.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::cache::{Cache, CacheValue, LocalTableCache, RemoteCache, TieredCache};
use crate::error::{CacheError, Result};
use crate::models::{
    CounterResponse, DeleteResponse, GetResponse, HealthResponse, IncrRequest, KeysQuery,
    KeysResponse, LockRequest, LockResponse, SetRequest, SetResponse, StatsResponse,
};
use crate::store::RemoteStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Backend serving the API
    pub cache: Arc<dyn Cache>,
}

impl AppState {
    /// Creates a new AppState over any backend.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub fn local(cache: LocalTableCache) -> Self {
        Self::new(Arc::new(cache))
    }

    pub fn remote<S: RemoteStore>(cache: RemoteCache<S>) -> Self {
        Self::new(Arc::new(cache))
    }

    pub fn tiered<S: RemoteStore>(cache: TieredCache<S>) -> Self {
        Self::new(Arc::new(cache))
    }
}

/// Handler for PUT /cache
///
/// Stores a JSON value, optionally only when the key is absent.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let value = CacheValue::from_json(req.value);
    let stored = if req.nx {
        state.cache.set_nx(&req.key, value, req.ttl).await?
    } else {
        state.cache.set(&req.key, value, req.ttl).await?
    };

    Ok(Json(SetResponse::new(req.key, stored)))
}

/// Handler for GET /cache/:key
///
/// Absent, expired and stored-null entries are all reported as not found.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get(&key).await? {
        Some(value) => Ok(Json(GetResponse::new(key, value.to_json()))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /cache/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.cache.delete(&key).await?;
    Ok(Json(DeleteResponse::new(key, deleted)))
}

/// Handler for POST /incr
///
/// Steps a counter by `amount`. Without an explicit `default` an absent key
/// simply starts from zero.
pub async fn incr_handler(
    State(state): State<AppState>,
    Json(req): Json<IncrRequest>,
) -> Result<Json<CounterResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let value = if req.amount >= 0 {
        let default = req.default.unwrap_or(1);
        state.cache.incr_by(&req.key, req.ttl, req.amount, default).await?
    } else {
        let default = req.default.unwrap_or(-1);
        state.cache.decr_by(&req.key, req.ttl, req.amount.saturating_neg(), default).await?
    };

    Ok(Json(CounterResponse::new(req.key, value)))
}

/// Handler for POST /lock
pub async fn lock_handler(
    State(state): State<AppState>,
    Json(req): Json<LockRequest>,
) -> Result<Json<LockResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let acquired = state.cache.lock(&req.key, &req.value, req.ttl).await?;
    Ok(Json(LockResponse::new(req.key, acquired)))
}

/// Handler for GET /lock/:key
pub async fn lock_status_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<LockResponse>> {
    let locked = state.cache.is_locked(&key).await?;
    Ok(Json(LockResponse::new(key, locked)))
}

/// Handler for DELETE /lock/:key
///
/// Reports `locked: false` once the call returns, whether or not the lock
/// was held.
pub async fn unlock_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<LockResponse>> {
    state.cache.unlock(&key).await?;
    Ok(Json(LockResponse::new(key, false)))
}

/// Handler for GET /keys
pub async fn keys_handler(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>> {
    let keys = state.cache.keys(&query.pattern).await?;
    Ok(Json(KeysResponse::new(query.pattern, keys)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.cache.stats().await;
    Json(StatsResponse::new(state.cache.name(), stats))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
