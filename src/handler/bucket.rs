//! # Bucket Handler
//!
//! Dispatch (first match wins):
//!
//! 1. deleting → remove the remote bucket (unless none was ever provisioned)
//! 2. generation changed → create the bucket and apply its policy
//! 3. Ready and past the relist interval → verify the bucket and its policy
//! 4. Failed → re-enter by reason
//! 5. otherwise → nothing to do

use super::{describe, emit};
use crate::controller::reconciler::{PhaseHandler, Transition};
use crate::crd::{
    format_heartbeat, is_past_relist, Bucket, BucketPhase, BucketReason, BucketStatus,
};
use crate::events::EventRecorder;
use crate::store::Store;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct BucketHandler {
    store: Arc<dyn Store>,
    recorder: Arc<dyn EventRecorder>,
    external_endpoint: String,
    relist_interval: Duration,
}

impl std::fmt::Debug for BucketHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketHandler")
            .field("external_endpoint", &self.external_endpoint)
            .field("relist_interval", &self.relist_interval)
            .finish_non_exhaustive()
    }
}

impl BucketHandler {
    pub fn new(
        store: Arc<dyn Store>,
        recorder: Arc<dyn EventRecorder>,
        external_endpoint: impl Into<String>,
        relist_interval: Duration,
    ) -> Self {
        Self {
            store,
            recorder,
            external_endpoint: external_endpoint.into(),
            relist_interval,
        }
    }

    fn is_on_delete(bucket: &Bucket) -> bool {
        bucket.metadata.deletion_timestamp.is_some()
    }

    fn is_on_add_or_update(bucket: &Bucket, status: &BucketStatus) -> bool {
        status.observed_generation != bucket.metadata.generation.unwrap_or(0)
    }

    fn is_on_ready(&self, status: &BucketStatus, now: DateTime<Utc>) -> bool {
        status.is_ready()
            && is_past_relist(
                status.last_heartbeat_time.as_deref(),
                now,
                self.relist_interval,
            )
    }

    fn is_on_failed(status: &BucketStatus) -> bool {
        status.phase == Some(BucketPhase::Failed)
    }

    async fn on_delete(
        &self,
        token: &CancellationToken,
        status: &BucketStatus,
    ) -> Transition<BucketStatus> {
        if status.remote_name.is_empty() || status.reason_code() == Some(BucketReason::NotFound) {
            debug!("No remote bucket to delete");
            return Transition::none();
        }

        info!(remote = status.remote_name.as_str(), "Deleting remote bucket");
        if let Err(e) = self.store.delete_bucket(token, &status.remote_name).await {
            warn!(remote = status.remote_name.as_str(), error = %e, "Failed to delete remote bucket");
            return Transition::error(
                e.context(format!("while deleting bucket {}", status.remote_name)),
            );
        }
        info!(remote = status.remote_name.as_str(), "Remote bucket deleted");
        Transition::none()
    }

    async fn on_add_or_update(
        &self,
        now: DateTime<Utc>,
        bucket: &Bucket,
        status: &BucketStatus,
    ) -> Transition<BucketStatus> {
        if !status.remote_name.is_empty() {
            return self.on_ready(now, bucket, &status.remote_name).await;
        }

        let namespace = bucket.namespace().unwrap_or_default();
        let region = bucket.spec.region.as_deref().unwrap_or_default();
        info!("Creating remote bucket");
        let remote_name = match self
            .store
            .create_bucket(&namespace, &bucket.name_any(), region)
            .await
        {
            Ok(remote_name) => remote_name,
            Err(e) => {
                let error = e.context("while creating bucket");
                return self
                    .failure(now, bucket, BucketReason::CreationFailure, "", error)
                    .await;
            }
        };
        info!(remote = remote_name.as_str(), "Remote bucket created");

        if let Err(e) = self
            .store
            .set_bucket_policy(&remote_name, bucket.spec.policy)
            .await
        {
            let error = e.context(format!("while setting policy of bucket {remote_name}"));
            return self
                .failure(now, bucket, BucketReason::PolicyUpdateFailed, &remote_name, error)
                .await;
        }

        self.success(now, bucket, &remote_name).await
    }

    async fn on_ready(
        &self,
        now: DateTime<Utc>,
        bucket: &Bucket,
        remote_name: &str,
    ) -> Transition<BucketStatus> {
        match self.store.bucket_exists(remote_name).await {
            Ok(true) => {}
            Ok(false) => {
                let status =
                    self.status(now, bucket, BucketPhase::Failed, BucketReason::NotFound, remote_name, "");
                emit(
                    self.recorder.as_ref(),
                    bucket,
                    true,
                    BucketReason::NotFound.as_str(),
                    status.message.clone(),
                )
                .await;
                return Transition::failed(status, anyhow!("bucket {remote_name} doesn't exist"));
            }
            Err(e) => {
                let error = e.context(format!("while checking if bucket {remote_name} exists"));
                return self
                    .failure(now, bucket, BucketReason::VerificationFailure, remote_name, error)
                    .await;
            }
        }

        let policy = bucket.spec.policy;
        match self.store.compare_bucket_policy(remote_name, policy).await {
            Ok(true) => {
                debug!(remote = remote_name, "Bucket policy up to date");
                return self.success(now, bucket, remote_name).await;
            }
            Ok(false) => {}
            Err(e) => {
                let error = e.context(format!("while verifying policy of bucket {remote_name}"));
                return self
                    .failure(
                        now,
                        bucket,
                        BucketReason::PolicyVerificationFailed,
                        remote_name,
                        error,
                    )
                    .await;
            }
        }

        info!(remote = remote_name, policy = %policy, "Updating bucket policy");
        if let Err(e) = self.store.set_bucket_policy(remote_name, policy).await {
            let error = e.context(format!("while setting policy of bucket {remote_name}"));
            return self
                .failure(now, bucket, BucketReason::PolicyUpdateFailed, remote_name, error)
                .await;
        }

        self.success(now, bucket, remote_name).await
    }

    async fn on_failed(
        &self,
        now: DateTime<Utc>,
        bucket: &Bucket,
        status: &BucketStatus,
    ) -> Transition<BucketStatus> {
        match status.reason_code() {
            Some(BucketReason::NotFound | BucketReason::CreationFailure) => {
                self.on_add_or_update(now, bucket, status).await
            }
            Some(BucketReason::VerificationFailure | BucketReason::PolicyUpdateFailed) => {
                self.on_ready(now, bucket, &status.remote_name).await
            }
            _ => {
                debug!(reason = status.reason.as_str(), "Failed bucket needs no action");
                Transition::none()
            }
        }
    }

    async fn success(
        &self,
        now: DateTime<Utc>,
        bucket: &Bucket,
        remote_name: &str,
    ) -> Transition<BucketStatus> {
        let status = self.status(
            now,
            bucket,
            BucketPhase::Ready,
            BucketReason::PolicyUpdated,
            remote_name,
            "",
        );
        emit(
            self.recorder.as_ref(),
            bucket,
            false,
            BucketReason::PolicyUpdated.as_str(),
            status.message.clone(),
        )
        .await;
        Transition::status(status)
    }

    async fn failure(
        &self,
        now: DateTime<Utc>,
        bucket: &Bucket,
        reason: BucketReason,
        remote_name: &str,
        error: anyhow::Error,
    ) -> Transition<BucketStatus> {
        let status = self.status(
            now,
            bucket,
            BucketPhase::Failed,
            reason,
            remote_name,
            &describe(&error),
        );
        emit(
            self.recorder.as_ref(),
            bucket,
            true,
            reason.as_str(),
            status.message.clone(),
        )
        .await;
        Transition::failed(status, error)
    }

    /// Build a status; `BucketNotFound` drops the remote so the next pass recreates it
    fn status(
        &self,
        now: DateTime<Utc>,
        bucket: &Bucket,
        phase: BucketPhase,
        reason: BucketReason,
        remote_name: &str,
        detail: &str,
    ) -> BucketStatus {
        let message = if reason == BucketReason::NotFound {
            reason.message(remote_name)
        } else {
            reason.message(detail)
        };
        let remote_name = if reason == BucketReason::NotFound {
            ""
        } else {
            remote_name
        };
        let url = if remote_name.is_empty() {
            String::new()
        } else {
            format!(
                "{}/{remote_name}",
                self.external_endpoint.trim_end_matches('/')
            )
        };

        BucketStatus {
            phase: Some(phase),
            reason: reason.as_str().to_string(),
            message,
            observed_generation: bucket.metadata.generation.unwrap_or(0),
            last_heartbeat_time: Some(format_heartbeat(now)),
            remote_name: remote_name.to_string(),
            url,
        }
    }
}

#[async_trait]
impl PhaseHandler<Bucket> for BucketHandler {
    async fn handle(
        &self,
        token: &CancellationToken,
        now: DateTime<Utc>,
        bucket: &Bucket,
    ) -> Transition<BucketStatus> {
        let status = bucket.status.clone().unwrap_or_default();

        if Self::is_on_delete(bucket) {
            debug!("On delete");
            self.on_delete(token, &status).await
        } else if Self::is_on_add_or_update(bucket, &status) {
            debug!("On add or update");
            self.on_add_or_update(now, bucket, &status).await
        } else if self.is_on_ready(&status, now) {
            debug!("On ready");
            self.on_ready(now, bucket, &status.remote_name).await
        } else if Self::is_on_failed(&status) {
            debug!("On failed");
            self.on_failed(now, bucket, &status).await
        } else {
            debug!("Action not taken");
            Transition::none()
        }
    }
}
