//! # Optimistic-Concurrency Retry
//!
//! Fetch, mutate and write an object until the write lands on the version it
//! was computed from. After a conflict the local watch cache is given a chance
//! to catch up before the next attempt, so passes do not keep recomputing from
//! a copy the API server already rejected.

use crate::config::ConflictRetryConfig;
use crate::controller::client::{ApiError, CacheSync, ObjectClient};
use crate::observability;
use kube::{Resource, ResourceExt};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempt bound and backoff curve for conflicting writes
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub cache_sync_timeout: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &ConflictRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            cache_sync_timeout: Duration::from_secs(config.cache_sync_timeout_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConflictRetryConfig::default())
    }
}

/// Which part of the object a retried write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    /// Metadata and spec (finalizers)
    Object,
    /// The status subresource
    Status,
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("while fetching {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: ApiError,
    },
    #[error("while updating {name}: {source}")]
    Update {
        name: String,
        #[source]
        source: ApiError,
    },
    #[error("gave up updating {name} after {attempts} conflicting attempts")]
    Exhausted { name: String, attempts: u32 },
    #[error("cancelled while updating {name}")]
    Cancelled { name: String },
}

/// Apply `mutate` to the latest copy of `namespace/name` and write it back
///
/// `mutate` returns `false` when the object already has the desired shape; no
/// write happens then and the fetched copy is returned. A missing object is
/// not an error and yields `Ok(None)`.
#[allow(
    clippy::too_many_arguments,
    reason = "identity, collaborators and policy are all required per call"
)]
pub async fn update_with_retry<K, F>(
    client: &dyn ObjectClient<K>,
    cache: &dyn CacheSync,
    policy: &RetryPolicy,
    token: &CancellationToken,
    kind: &str,
    namespace: &str,
    name: &str,
    target: UpdateTarget,
    mut mutate: F,
) -> Result<Option<K>, RetryError>
where
    K: Resource + Send,
    F: FnMut(&mut K) -> bool + Send,
{
    let mut delay = policy.initial_backoff;

    for attempt in 1..=policy.max_attempts {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled {
                name: name.to_string(),
            });
        }

        let mut object = match client.get(namespace, name).await {
            Ok(object) => object,
            Err(ApiError::NotFound) => {
                debug!(resource.name = name, resource.namespace = namespace, "Object already gone");
                return Ok(None);
            }
            Err(source) => {
                return Err(RetryError::Fetch {
                    name: name.to_string(),
                    source,
                })
            }
        };

        if !mutate(&mut object) {
            return Ok(Some(object));
        }

        let stale_version = object.resource_version();
        let result = match target {
            UpdateTarget::Object => client.replace(&object).await,
            UpdateTarget::Status => client.replace_status(&object).await,
        };

        match result {
            Ok(updated) => return Ok(Some(updated)),
            Err(ApiError::NotFound) => return Ok(None),
            Err(ApiError::Conflict) => {
                observability::increment_conflict_retries(kind);
                debug!(
                    resource.name = name,
                    resource.namespace = namespace,
                    attempt,
                    "Version conflict, waiting for cache to resync"
                );
                if attempt == policy.max_attempts {
                    break;
                }
                if !cache
                    .wait_for_sync(
                        token,
                        namespace,
                        name,
                        stale_version.as_deref(),
                        policy.cache_sync_timeout,
                    )
                    .await
                {
                    debug!(resource.name = name, "Proceeding without a resynced cache");
                }
                tokio::select! {
                    () = token.cancelled() => {
                        return Err(RetryError::Cancelled { name: name.to_string() });
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                delay = delay.saturating_mul(2).min(policy.max_backoff);
            }
            Err(source) => {
                return Err(RetryError::Update {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    warn!(
        resource.name = name,
        resource.namespace = namespace,
        attempts = policy.max_attempts,
        "Giving up after repeated version conflicts"
    );
    Err(RetryError::Exhausted {
        name: name.to_string(),
        attempts: policy.max_attempts,
    })
}
