//! # Asset Handler
//!
//! Dispatch (first match wins):
//!
//! 1. deleting → remove the asset's objects from its bucket
//! 2. generation changed → `Pending/Scheduled`, no I/O
//! 3. Ready and past the relist interval → verify the uploaded files are still there
//! 4. Pending → pull, mutate, validate, extract metadata, upload
//!    (a `BucketNotReady` asset waits for the relist interval first)
//! 5. Failed, unless rejected by a webhook → same as Pending
//! 6. otherwise → nothing to do
//!
//! Webhook rejections (`MutationFailed`, `ValidationFailed`) are terminal until
//! the Asset is edited.

use super::lookup::{BucketState, BucketStatusLookup};
use super::{describe, emit};
use crate::controller::reconciler::{PhaseHandler, Transition};
use crate::crd::{
    format_heartbeat, is_past_relist, Asset, AssetFile, AssetPhase, AssetReason, AssetStatus,
    AssetStatusRef, BucketStatus,
};
use crate::events::EventRecorder;
use crate::hook::{MetadataExtractor, Mutator, Validator};
use crate::loader::Loader;
use crate::store::{asset_prefix, Store};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct AssetHandler {
    buckets: Arc<dyn BucketStatusLookup>,
    store: Arc<dyn Store>,
    loader: Arc<dyn Loader>,
    validator: Arc<dyn Validator>,
    mutator: Arc<dyn Mutator>,
    metadata_extractor: Arc<dyn MetadataExtractor>,
    recorder: Arc<dyn EventRecorder>,
    relist_interval: Duration,
}

impl std::fmt::Debug for AssetHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetHandler")
            .field("relist_interval", &self.relist_interval)
            .finish_non_exhaustive()
    }
}

impl AssetHandler {
    #[allow(
        clippy::too_many_arguments,
        reason = "one collaborator per external system the asset flow touches"
    )]
    pub fn new(
        buckets: Arc<dyn BucketStatusLookup>,
        store: Arc<dyn Store>,
        loader: Arc<dyn Loader>,
        validator: Arc<dyn Validator>,
        mutator: Arc<dyn Mutator>,
        metadata_extractor: Arc<dyn MetadataExtractor>,
        recorder: Arc<dyn EventRecorder>,
        relist_interval: Duration,
    ) -> Self {
        Self {
            buckets,
            store,
            loader,
            validator,
            mutator,
            metadata_extractor,
            recorder,
            relist_interval,
        }
    }

    fn is_on_delete(asset: &Asset) -> bool {
        asset.metadata.deletion_timestamp.is_some()
    }

    fn is_on_add_or_update(asset: &Asset, status: &AssetStatus) -> bool {
        status.observed_generation != asset.metadata.generation.unwrap_or(0)
    }

    fn is_on_ready(&self, status: &AssetStatus, now: DateTime<Utc>) -> bool {
        status.phase == Some(AssetPhase::Ready)
            && is_past_relist(
                status.last_heartbeat_time.as_deref(),
                now,
                self.relist_interval,
            )
    }

    fn is_on_pending(&self, status: &AssetStatus, now: DateTime<Utc>) -> bool {
        if status.phase != Some(AssetPhase::Pending) {
            return false;
        }
        status.reason_code() != Some(AssetReason::BucketNotReady)
            || is_past_relist(
                status.last_heartbeat_time.as_deref(),
                now,
                self.relist_interval,
            )
    }

    fn is_on_failed(status: &AssetStatus) -> bool {
        status.phase == Some(AssetPhase::Failed)
            && !matches!(
                status.reason_code(),
                Some(AssetReason::ValidationFailed | AssetReason::MutationFailed)
            )
    }

    async fn on_delete(&self, token: &CancellationToken, asset: &Asset) -> Transition<AssetStatus> {
        let namespace = asset.namespace().unwrap_or_default();
        let bucket_name = &asset.spec.bucket_ref.name;
        let bucket = match self.buckets.find(&namespace, bucket_name).await {
            Ok(BucketState::Ready(bucket)) => bucket,
            Ok(BucketState::NotReady) => {
                debug!(bucket = bucket_name.as_str(), "Nothing to delete, bucket is not ready");
                return Transition::none();
            }
            Err(e) => return Transition::error(e.context("while reading bucket status")),
        };

        match self.delete_remote_content(token, asset, &bucket).await {
            Ok(()) => {
                info!("Asset content removed");
                Transition::none()
            }
            Err(e) => Transition::error(e),
        }
    }

    async fn delete_remote_content(
        &self,
        token: &CancellationToken,
        asset: &Asset,
        bucket: &BucketStatus,
    ) -> Result<()> {
        let prefix = asset_prefix(&asset.name_any());
        let objects = self
            .store
            .list_objects(token, &bucket.remote_name, &prefix)
            .await
            .context("while listing files in bucket")?;

        if objects.is_empty() {
            debug!("Bucket holds no files of this asset");
            return Ok(());
        }

        info!(objects = objects.len(), "Deleting asset remote content");
        self.store
            .delete_objects(token, &bucket.remote_name, &prefix)
            .await
            .context("while deleting asset content")?;
        emit(
            self.recorder.as_ref(),
            asset,
            false,
            AssetReason::Cleaned.as_str(),
            AssetReason::Cleaned.message(""),
        )
        .await;
        Ok(())
    }

    /// The referenced bucket when it is ready, or the status to report otherwise
    async fn ready_bucket(
        &self,
        now: DateTime<Utc>,
        asset: &Asset,
    ) -> Result<BucketStatus, Transition<AssetStatus>> {
        let namespace = asset.namespace().unwrap_or_default();
        let bucket_name = &asset.spec.bucket_ref.name;

        match self.buckets.find(&namespace, bucket_name).await {
            Ok(BucketState::Ready(bucket)) => {
                debug!(bucket = bucket_name.as_str(), "Bucket is ready");
                Ok(bucket)
            }
            Ok(BucketState::NotReady) => {
                info!(bucket = bucket_name.as_str(), "Bucket is not ready");
                let status = self.status(now, asset, AssetPhase::Pending, AssetReason::BucketNotReady, "");
                self.record(asset, true, AssetReason::BucketNotReady, &status).await;
                Err(Transition::status(status))
            }
            Err(e) => Err(self
                .failure(now, asset, AssetReason::BucketError, e.context("while reading bucket status"))
                .await),
        }
    }

    async fn on_ready(
        &self,
        token: &CancellationToken,
        now: DateTime<Utc>,
        asset: &Asset,
        status: &AssetStatus,
    ) -> Transition<AssetStatus> {
        let bucket = match self.ready_bucket(now, asset).await {
            Ok(bucket) => bucket,
            Err(transition) => return transition,
        };

        let files: Vec<String> = status
            .asset_ref
            .files
            .iter()
            .map(|f| f.name.clone())
            .collect();
        match self
            .store
            .contains_all_objects(token, &bucket.remote_name, &asset.name_any(), &files)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let status = self.status(now, asset, AssetPhase::Failed, AssetReason::MissingContent, "");
                self.record(asset, true, AssetReason::MissingContent, &status).await;
                return Transition::status(status);
            }
            Err(e) => {
                return self
                    .failure(
                        now,
                        asset,
                        AssetReason::RemoteContentVerificationError,
                        e.context("while verifying remote content"),
                    )
                    .await;
            }
        }

        debug!("Asset is up to date");
        let ready = self.ready_status(
            now,
            asset,
            status.asset_ref.base_url.clone(),
            status.asset_ref.files.clone(),
        );
        self.record(asset, false, AssetReason::Uploaded, &ready).await;
        Transition::status(ready)
    }

    async fn on_pending(
        &self,
        token: &CancellationToken,
        now: DateTime<Utc>,
        asset: &Asset,
    ) -> Transition<AssetStatus> {
        let bucket = match self.ready_bucket(now, asset).await {
            Ok(bucket) => bucket,
            Err(transition) => return transition,
        };

        if let Err(e) = self.delete_remote_content(token, asset, &bucket).await {
            return self.failure(now, asset, AssetReason::CleanupError, e).await;
        }

        let source = &asset.spec.source;
        info!(url = source.url.as_str(), "Loading asset content");
        let content = match self
            .loader
            .load(&source.url, &asset.name_any(), source.mode, source.filter.as_deref())
            .await
        {
            Ok(content) => content,
            Err(e) => {
                return self
                    .failure(now, asset, AssetReason::PullingFailed, e.context("while pulling content"))
                    .await;
            }
        };
        self.record_normal(asset, AssetReason::Pulled).await;

        let transition = self
            .process_content(token, now, asset, &bucket, &content.base_path, &content.files)
            .await;

        if let Err(e) = self.loader.clean(&content.base_path).await {
            warn!(path = %content.base_path.display(), error = %e, "Failed to clean loaded content");
        }

        transition
    }

    /// Mutate, validate, extract metadata and upload loaded files
    async fn process_content(
        &self,
        token: &CancellationToken,
        now: DateTime<Utc>,
        asset: &Asset,
        bucket: &BucketStatus,
        base_path: &Path,
        files: &[String],
    ) -> Transition<AssetStatus> {
        let source = &asset.spec.source;

        if !source.mutation_webhook_service.is_empty() {
            info!("Mutating asset content");
            match self
                .mutator
                .mutate(token, base_path, files, &source.mutation_webhook_service)
                .await
            {
                Ok(result) if result.success => self.record_normal(asset, AssetReason::Mutated).await,
                Ok(result) => return self.rejected(now, asset, AssetReason::MutationFailed, &result.summary()).await,
                Err(e) => {
                    return self
                        .failure(now, asset, AssetReason::MutationError, anyhow::Error::from(e).context("while mutating content"))
                        .await;
                }
            }
        }

        if !source.validation_webhook_service.is_empty() {
            info!("Validating asset content");
            match self
                .validator
                .validate(token, base_path, files, &source.validation_webhook_service)
                .await
            {
                Ok(result) if result.success => {
                    self.record_normal(asset, AssetReason::Validated).await;
                }
                Ok(result) => return self.rejected(now, asset, AssetReason::ValidationFailed, &result.summary()).await,
                Err(e) => {
                    return self
                        .failure(now, asset, AssetReason::ValidationError, anyhow::Error::from(e).context("while validating content"))
                        .await;
                }
            }
        }

        let mut asset_files: Vec<AssetFile> = files
            .iter()
            .map(|name| AssetFile {
                name: name.clone(),
                metadata: None,
            })
            .collect();

        if !source.metadata_webhook_service.is_empty() {
            info!("Extracting metadata from asset content");
            match self
                .metadata_extractor
                .extract(token, base_path, files, &source.metadata_webhook_service)
                .await
            {
                Ok(metadata) => {
                    merge_metadata(&mut asset_files, metadata);
                    self.record_normal(asset, AssetReason::MetadataExtracted).await;
                }
                Err(e) => {
                    return self
                        .failure(
                            now,
                            asset,
                            AssetReason::MetadataExtractionFailed,
                            anyhow::Error::from(e).context("while extracting metadata"),
                        )
                        .await;
                }
            }
        }

        info!(files = files.len(), "Uploading asset content");
        if let Err(e) = self
            .store
            .put_objects(token, &bucket.remote_name, &asset.name_any(), base_path, files)
            .await
        {
            return self
                .failure(now, asset, AssetReason::UploadFailed, e.context("while uploading content"))
                .await;
        }

        let base_url = format!("{}/{}", bucket.url.trim_end_matches('/'), asset.name_any());
        let ready = self.ready_status(now, asset, base_url, asset_files);
        self.record(asset, false, AssetReason::Uploaded, &ready).await;
        Transition::status(ready)
    }

    /// Webhook rejected the content: a terminal status, no error
    async fn rejected(
        &self,
        now: DateTime<Utc>,
        asset: &Asset,
        reason: AssetReason,
        summary: &str,
    ) -> Transition<AssetStatus> {
        info!(reason = reason.as_str(), messages = summary, "Asset content rejected");
        let status = self.status(now, asset, AssetPhase::Failed, reason, summary);
        self.record(asset, true, reason, &status).await;
        Transition::status(status)
    }

    async fn failure(
        &self,
        now: DateTime<Utc>,
        asset: &Asset,
        reason: AssetReason,
        error: anyhow::Error,
    ) -> Transition<AssetStatus> {
        let status = self.status(now, asset, AssetPhase::Failed, reason, &describe(&error));
        self.record(asset, true, reason, &status).await;
        Transition::failed(status, error)
    }

    async fn record(&self, asset: &Asset, warning: bool, reason: AssetReason, status: &AssetStatus) {
        emit(
            self.recorder.as_ref(),
            asset,
            warning,
            reason.as_str(),
            status.message.clone(),
        )
        .await;
    }

    async fn record_normal(&self, asset: &Asset, reason: AssetReason) {
        emit(
            self.recorder.as_ref(),
            asset,
            false,
            reason.as_str(),
            reason.message(""),
        )
        .await;
    }

    fn status(
        &self,
        now: DateTime<Utc>,
        asset: &Asset,
        phase: AssetPhase,
        reason: AssetReason,
        detail: &str,
    ) -> AssetStatus {
        AssetStatus {
            phase: Some(phase),
            reason: reason.as_str().to_string(),
            message: reason.message(detail),
            observed_generation: asset.metadata.generation.unwrap_or(0),
            last_heartbeat_time: Some(format_heartbeat(now)),
            asset_ref: AssetStatusRef::default(),
        }
    }

    fn ready_status(
        &self,
        now: DateTime<Utc>,
        asset: &Asset,
        base_url: String,
        files: Vec<AssetFile>,
    ) -> AssetStatus {
        AssetStatus {
            asset_ref: AssetStatusRef { base_url, files },
            ..self.status(now, asset, AssetPhase::Ready, AssetReason::Uploaded, "")
        }
    }
}

/// Attach extracted metadata to the matching files
fn merge_metadata(files: &mut [AssetFile], mut metadata: BTreeMap<String, Value>) {
    for file in files {
        file.metadata = metadata.remove(&file.name);
    }
}

#[async_trait]
impl PhaseHandler<Asset> for AssetHandler {
    async fn handle(
        &self,
        token: &CancellationToken,
        now: DateTime<Utc>,
        asset: &Asset,
    ) -> Transition<AssetStatus> {
        let status = asset.status.clone().unwrap_or_default();

        if Self::is_on_delete(asset) {
            debug!("On delete");
            self.on_delete(token, asset).await
        } else if Self::is_on_add_or_update(asset, &status) {
            debug!("On add or update");
            let scheduled = self.status(now, asset, AssetPhase::Pending, AssetReason::Scheduled, "");
            self.record(asset, false, AssetReason::Scheduled, &scheduled).await;
            Transition::status(scheduled)
        } else if self.is_on_ready(&status, now) {
            debug!("On ready");
            self.on_ready(token, now, asset, &status).await
        } else if self.is_on_pending(&status, now) {
            debug!("On pending");
            self.on_pending(token, now, asset).await
        } else if Self::is_on_failed(&status) {
            debug!("On failed");
            self.on_pending(token, now, asset).await
        } else {
            debug!("Action not taken");
            Transition::none()
        }
    }
}
