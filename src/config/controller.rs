//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::*;
use std::time::Duration;

/// Worker pool size and per-call deadline for one webhook engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Number of concurrent webhook calls
    pub workers_count: usize,
    /// Per-call deadline (seconds)
    pub timeout_secs: u64,
}

impl WebhookConfig {
    /// Get the per-call deadline
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn from_env(prefix: &str) -> Self {
        Self {
            workers_count: env_var_or_default(
                &format!("{prefix}_WORKERS_COUNT"),
                DEFAULT_WEBHOOK_WORKERS_COUNT,
            )
            .max(1),
            timeout_secs: env_var_or_default(
                &format!("{prefix}_TIMEOUT_SECS"),
                DEFAULT_WEBHOOK_TIMEOUT_SECS,
            ),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            workers_count: DEFAULT_WEBHOOK_WORKERS_COUNT,
            timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
        }
    }
}

/// Per-kind controller settings (one for Bucket, one for Asset)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindConfig {
    /// Minimum period between unforced re-verifications of a Ready resource (seconds)
    pub relist_interval_secs: u64,
    /// Maximum concurrent reconciliations for this kind
    pub max_concurrent_reconciles: u16,
}

impl KindConfig {
    /// Get the relist interval
    #[must_use]
    pub fn relist_interval(&self) -> Duration {
        Duration::from_secs(self.relist_interval_secs)
    }

    fn from_env(prefix: &str) -> Self {
        Self {
            relist_interval_secs: env_var_or_default(
                &format!("{prefix}_RELIST_INTERVAL_SECS"),
                DEFAULT_RELIST_INTERVAL_SECS,
            ),
            max_concurrent_reconciles: env_var_or_default(
                &format!("{prefix}_MAX_CONCURRENT_RECONCILES"),
                DEFAULT_MAX_CONCURRENT_RECONCILES,
            )
            .max(1),
        }
    }
}

impl Default for KindConfig {
    fn default() -> Self {
        Self {
            relist_interval_secs: DEFAULT_RELIST_INTERVAL_SECS,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
        }
    }
}

/// Object store connection settings
#[derive(Clone)]
pub struct StoreConfig {
    /// S3 API endpoint the controller talks to
    pub endpoint: String,
    /// Endpoint published in Bucket/Asset status URLs
    pub external_endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Region used for signing and as the default bucket location
    pub region: String,
    /// Concurrent uploads per asset
    pub upload_workers_count: usize,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("external_endpoint", &self.external_endpoint)
            .field("access_key", &"***")
            .field("secret_key", &"***")
            .field("region", &self.region)
            .field("upload_workers_count", &self.upload_workers_count)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://minio.kyma.local".to_string(),
            external_endpoint: "https://minio.kyma.local".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            region: "us-east-1".to_string(),
            upload_workers_count: DEFAULT_UPLOAD_WORKERS_COUNT,
        }
    }
}

/// Content loader settings
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Parent directory for per-asset temporary directories
    pub temporary_directory: std::path::PathBuf,
    /// Timeout for a single source download (seconds)
    pub download_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            temporary_directory: std::env::temp_dir(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Optimistic-concurrency retry settings for finalizer and status writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How long to wait for the watch cache after a conflict (seconds)
    pub cache_sync_timeout_secs: u64,
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONFLICT_RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_CONFLICT_RETRY_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_CONFLICT_RETRY_MAX_BACKOFF_MS,
            cache_sync_timeout_secs: DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub bucket: KindConfig,
    pub asset: KindConfig,
    pub validation_webhook: WebhookConfig,
    pub mutation_webhook: WebhookConfig,
    pub metadata_webhook: WebhookConfig,
    pub store: StoreConfig,
    pub loader: LoaderConfig,
    pub conflict_retry: ConflictRetryConfig,
    /// HTTP port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let store_defaults = StoreConfig::default();
        let loader_defaults = LoaderConfig::default();
        Self {
            bucket: KindConfig::from_env("BUCKET"),
            asset: KindConfig::from_env("ASSET"),
            validation_webhook: WebhookConfig::from_env("WEBHOOK_VALIDATION"),
            mutation_webhook: WebhookConfig::from_env("WEBHOOK_MUTATION"),
            metadata_webhook: WebhookConfig::from_env("WEBHOOK_METADATA"),
            store: StoreConfig {
                endpoint: env_var_or_default_str("STORE_ENDPOINT", &store_defaults.endpoint),
                external_endpoint: env_var_or_default_str(
                    "STORE_EXTERNAL_ENDPOINT",
                    &store_defaults.external_endpoint,
                ),
                access_key: env_var_or_default_str("STORE_ACCESS_KEY", ""),
                secret_key: env_var_or_default_str("STORE_SECRET_KEY", ""),
                region: env_var_or_default_str("STORE_REGION", &store_defaults.region),
                upload_workers_count: env_var_or_default(
                    "STORE_UPLOAD_WORKERS_COUNT",
                    DEFAULT_UPLOAD_WORKERS_COUNT,
                )
                .max(1),
            },
            loader: LoaderConfig {
                temporary_directory: std::env::var("LOADER_TEMPORARY_DIRECTORY")
                    .map(std::path::PathBuf::from)
                    .unwrap_or(loader_defaults.temporary_directory),
                download_timeout_secs: env_var_or_default(
                    "LOADER_DOWNLOAD_TIMEOUT_SECS",
                    DEFAULT_DOWNLOAD_TIMEOUT_SECS,
                ),
            },
            conflict_retry: ConflictRetryConfig {
                max_attempts: env_var_or_default(
                    "CONFLICT_RETRY_MAX_ATTEMPTS",
                    DEFAULT_CONFLICT_RETRY_MAX_ATTEMPTS,
                )
                .max(1),
                initial_backoff_ms: env_var_or_default(
                    "CONFLICT_RETRY_INITIAL_BACKOFF_MS",
                    DEFAULT_CONFLICT_RETRY_INITIAL_BACKOFF_MS,
                ),
                max_backoff_ms: env_var_or_default(
                    "CONFLICT_RETRY_MAX_BACKOFF_MS",
                    DEFAULT_CONFLICT_RETRY_MAX_BACKOFF_MS,
                ),
                cache_sync_timeout_secs: env_var_or_default(
                    "CACHE_SYNC_TIMEOUT_SECS",
                    DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
                ),
            },
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
