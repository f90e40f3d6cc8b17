//! Asset Store Controller Library
//!
//! Controllers converging `Bucket` and `Asset` resources onto S3-compatible
//! object storage. Assets are pulled from a URL, optionally mutated, validated
//! and annotated with metadata by webhooks, then uploaded into their bucket.
//!
//! Tests are included in the module files and under `tests/`.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod events;
pub mod finalizer;
pub mod handler;
pub mod hook;
pub mod loader;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod store;
