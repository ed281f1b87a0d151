//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: drains the local table's eviction timers
//! - Cold sweep: drops local rows that were rarely read

mod cleanup;

pub use cleanup::spawn_sweep_task;
