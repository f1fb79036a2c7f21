//! Axum HTTP API server.
//!
//! This crate provides:
//! - Presigned upload URLs and metadata extraction
//! - Compression job publication
//! - Status polling backed by a materialized result index
//! - Deferred, persisted cleanup of transient objects
//! - Liveness and readiness probes

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{CleanupScheduler, JobStatusResolver, MetadataService, PollOutcome};
pub use state::AppState;
