//! # Types
//!
//! Core types for the reconciler.

use crate::constants::{ERROR_BACKOFF_MAX_SECS, ERROR_BACKOFF_MIN_SECS};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::client::{ApiError, CacheSync, ObjectClient};
use crate::controller::retry::{RetryError, RetryPolicy};
use crate::crd::{Asset, AssetStatus, Bucket, BucketStatus, PhaseStatus};
use crate::finalizer::FinalizerManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::core::NamespaceResourceScope;
use kube::Resource;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A custom resource the generic reconciler can drive
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Send + Sync + 'static
{
    type Status: PhaseStatus + Clone + Debug + Send + Sync + 'static;

    /// Label used in logs and metrics
    const KIND: &'static str;

    fn status(&self) -> Option<&Self::Status>;
    fn set_status(&mut self, status: Self::Status);
}

impl ManagedResource for Bucket {
    type Status = BucketStatus;
    const KIND: &'static str = "bucket";

    fn status(&self) -> Option<&BucketStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: BucketStatus) {
        self.status = Some(status);
    }
}

impl ManagedResource for Asset {
    type Status = AssetStatus;
    const KIND: &'static str = "asset";

    fn status(&self) -> Option<&AssetStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: AssetStatus) {
        self.status = Some(status);
    }
}

/// Result of one phase-handler pass
///
/// `status` is the next status to persist (if any); `error` is reported to the
/// controller runtime so the pass is retried with backoff. Both may be set.
#[derive(Debug)]
pub struct Transition<S> {
    pub status: Option<S>,
    pub error: Option<anyhow::Error>,
}

impl<S> Transition<S> {
    /// Nothing to persist, nothing failed
    #[must_use]
    pub fn none() -> Self {
        Self {
            status: None,
            error: None,
        }
    }

    #[must_use]
    pub fn status(status: S) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    /// A failure status that is also reported as an error
    #[must_use]
    pub fn failed(status: S, error: anyhow::Error) -> Self {
        Self {
            status: Some(status),
            error: Some(error),
        }
    }

    /// An error with no status change
    #[must_use]
    pub fn error(error: anyhow::Error) -> Self {
        Self {
            status: None,
            error: Some(error),
        }
    }
}

/// Phase state machine for one resource kind
#[async_trait]
pub trait PhaseHandler<K: ManagedResource>: Send + Sync {
    async fn handle(
        &self,
        token: &CancellationToken,
        now: DateTime<Utc>,
        object: &K,
    ) -> Transition<K::Status>;
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("while adding finalizer: {0}")]
    AddFinalizer(#[source] RetryError),
    #[error("while fetching object: {0}")]
    Fetch(#[source] ApiError),
    #[error("{0:#}")]
    Handler(anyhow::Error),
    #[error("while updating status: {0}")]
    Status(#[source] RetryError),
    #[error("{handler:#}; while updating status: {status}")]
    Combined {
        handler: anyhow::Error,
        status: RetryError,
    },
    #[error("while removing finalizer: {0}")]
    RemoveFinalizer(#[source] RetryError),
}

/// Trigger source for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Periodic relist of a converged resource
    Relist,
    /// Error backoff retry (Fibonacci backoff after failure)
    ErrorBackoff,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Relist => "relist",
            TriggerSource::ErrorBackoff => "error-backoff",
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(
                Duration::from_secs(ERROR_BACKOFF_MIN_SECS),
                Duration::from_secs(ERROR_BACKOFF_MAX_SECS),
            ),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared context of one controller
pub struct Reconciler<K: ManagedResource> {
    pub client: Arc<dyn ObjectClient<K>>,
    pub cache: Arc<dyn CacheSync>,
    pub handler: Arc<dyn PhaseHandler<K>>,
    pub finalizer: FinalizerManager,
    pub retry_policy: RetryPolicy,
    pub relist_interval: Duration,
    /// Parent of every per-pass cancellation token
    pub shutdown: CancellationToken,
    // Backoff state per resource (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl<K: ManagedResource> std::fmt::Debug for Reconciler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("kind", &K::KIND)
            .field("finalizer", &self.finalizer)
            .field("retry_policy", &self.retry_policy)
            .field("relist_interval", &self.relist_interval)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedResource> Reconciler<K> {
    pub fn new(
        client: Arc<dyn ObjectClient<K>>,
        cache: Arc<dyn CacheSync>,
        handler: Arc<dyn PhaseHandler<K>>,
        finalizer: FinalizerManager,
        retry_policy: RetryPolicy,
        relist_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            cache,
            handler,
            finalizer,
            retry_policy,
            relist_interval,
            shutdown,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Key used for per-resource bookkeeping
#[must_use]
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
