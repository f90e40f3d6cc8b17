//! # Controller
//!
//! Core controller modules for the Asset Store controllers.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `client`: Cluster API access and watch-cache resync
//! - `retry`: Optimistic-concurrency update helper
//! - `reconciler`: Generic reconciliation pass

pub mod backoff;
pub mod client;
pub mod reconciler;
pub mod retry;
