//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config`]).

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Finalizer placed on every Bucket and Asset before any remote work happens
pub const DELETE_FINALIZER_NAME: &str = "deleteremotecontent.finalizers.assetstore.kyma-project.io";

/// Field manager / reporting component name used for events
pub const CONTROLLER_NAME: &str = "asset-store-controller";

/// Default relist interval for Ready resources (seconds)
pub const DEFAULT_RELIST_INTERVAL_SECS: u64 = 30;

/// Default number of concurrent reconciles per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 1;

/// Default worker pool size for each webhook engine
pub const DEFAULT_WEBHOOK_WORKERS_COUNT: usize = 10;

/// Default per-call deadline for webhook requests (seconds)
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 60;

/// Default number of concurrent object uploads
pub const DEFAULT_UPLOAD_WORKERS_COUNT: usize = 10;

/// Default timeout for downloading asset sources (seconds)
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Default bound on optimistic-concurrency attempts
pub const DEFAULT_CONFLICT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default initial backoff after a version conflict (milliseconds)
pub const DEFAULT_CONFLICT_RETRY_INITIAL_BACKOFF_MS: u64 = 10;

/// Default cap on the conflict backoff (milliseconds)
pub const DEFAULT_CONFLICT_RETRY_MAX_BACKOFF_MS: u64 = 1000;

/// Default time to wait for the watch cache to catch up after a conflict (seconds)
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 5;

/// Error backoff base unit for the controller error policy (seconds)
pub const ERROR_BACKOFF_MIN_SECS: u64 = 1;

/// Error backoff cap for the controller error policy (seconds)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// How many candidate bucket names are tried before giving up
pub const BUCKET_NAME_ATTEMPTS: u32 = 10;

/// Version string placed in generated bucket policies
pub const BUCKET_POLICY_VERSION: &str = "2012-10-17";

/// How often the watch cache is polled while waiting for it to catch up
pub const CACHE_SYNC_POLL_INTERVAL_MS: u64 = 50;
