//! Object store client.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait consumed by the API and the worker
//! - [`R2Client`], an S3-compatible implementation (Cloudflare R2)
//! - [`MemoryStore`], an in-process implementation for tests and local runs
//! - Presigned GET/PUT request generation

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use store::ObjectStore;
