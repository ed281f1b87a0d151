//! API Module
//!
//! HTTP handlers and routing for the cache admin REST API.
//!
//! # Endpoints
//! - `PUT /cache` - Store a value
//! - `GET /cache/:key` - Retrieve a value by key
//! - `DELETE /cache/:key` - Delete a key
//! - `POST /incr` - Step a counter
//! - `POST /lock` - Take a lock
//! - `GET /lock/:key` - Check a lock
//! - `DELETE /lock/:key` - Release a lock
//! - `GET /keys?pattern=` - List keys matching a glob
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
