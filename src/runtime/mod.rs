//! # Runtime
//!
//! Controller runtime: startup, the Bucket and Asset watch loops, and the
//! error policy applied to failed reconciliations.
//!
//! - `initialization.rs` - rustls, logging, metrics, HTTP server and collaborators
//! - `watch_loop.rs` - Runs both controllers until shutdown
//! - `error_policy.rs` - Per-resource Fibonacci backoff after errors

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
