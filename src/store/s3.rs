//! # S3 Store
//!
//! [`Store`] backed by `aws-sdk-s3`, addressed path-style so it works against
//! MinIO as well as AWS.

use super::policy::{policy_matches, render_policy_json};
use super::{asset_prefix, Store};
use crate::config::StoreConfig;
use crate::constants::BUCKET_NAME_ATTEMPTS;
use crate::crd::BucketPolicy;
use crate::observability;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// S3 limits bucket names to 63 characters
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Objects per `DeleteObjects` request
const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    default_region: String,
    upload_workers: usize,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, default_region: String, upload_workers: usize) -> Self {
        Self {
            client,
            default_region,
            upload_workers: upload_workers.max(1),
        }
    }

    /// Build a client from static credentials and a custom endpoint
    pub async fn from_config(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "asset-store-controller",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        info!(
            endpoint = %config.endpoint,
            region = %config.region,
            "Configured S3 store client"
        );

        Self::new(
            aws_sdk_s3::Client::from_conf(s3_config),
            config.region.clone(),
            config.upload_workers_count,
        )
    }

    async fn find_bucket_name(&self, cr_name: &str) -> Result<String> {
        let mut sleep = Duration::from_millis(1);
        for _ in 0..BUCKET_NAME_ATTEMPTS {
            let candidate = generate_bucket_name(cr_name);
            let exists = self
                .bucket_exists(&candidate)
                .await
                .context("while checking if bucket name is available")?;
            if !exists {
                return Ok(candidate);
            }
            tokio::time::sleep(sleep).await;
            sleep *= 2;
        }
        Err(anyhow!("cannot find bucket name for {cr_name}"))
    }

    async fn get_bucket_policy(&self, name: &str) -> Result<Option<String>> {
        match self.client.get_bucket_policy().bucket(name).send().await {
            Ok(output) => Ok(output.policy().map(ToString::to_string)),
            Err(err)
                if err
                    .as_service_error()
                    .and_then(|e| e.code())
                    .is_some_and(|code| code == "NoSuchBucketPolicy") =>
            {
                Ok(None)
            }
            Err(err) => Err(anyhow!(
                "while getting policy for bucket {name}: {}",
                DisplayErrorContext(&err)
            )),
        }
    }

    async fn list_keys(
        &self,
        token: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take());

            let result = tokio::select! {
                () = token.cancelled() => {
                    return Err(anyhow!("listing objects in bucket {bucket} cancelled"));
                }
                result = request.send() => result,
            };
            let output = result.map_err(|e| {
                anyhow!(
                    "cannot list objects in bucket {bucket}: {}",
                    DisplayErrorContext(&e)
                )
            })?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(ToString::to_string)),
            );

            match output.next_continuation_token() {
                Some(next) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(next.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn put_object(
        &self,
        bucket: &str,
        asset_name: &str,
        source_base: &Path,
        file: &str,
    ) -> Result<()> {
        let key = format!("{}{}", asset_prefix(asset_name), file);
        let body = ByteStream::from_path(source_base.join(file))
            .await
            .with_context(|| format!("while reading {file}"))?;

        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(body)
            .send()
            .await;
        observability::metrics::record_store_operation("put_object", result.is_ok());
        result.map_err(|e| anyhow!("while uploading {key}: {}", DisplayErrorContext(&e)))?;
        Ok(())
    }
}

/// `<cr_name>-<base32 nanosecond timestamp>`, shortened to fit S3 name limits
#[must_use]
pub fn generate_bucket_name(cr_name: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let suffix = to_base32(nanos);
    let max_prefix = MAX_BUCKET_NAME_LEN.saturating_sub(suffix.len() + 1);
    let prefix: String = cr_name.chars().take(max_prefix).collect();
    format!("{}-{suffix}", prefix.trim_end_matches(['-', '.']))
}

/// Lowercase base-32 digits (`0-9a-v`)
fn to_base32(mut value: u128) -> String {
    const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 32) as usize]);
        value /= 32;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait]
impl Store for S3Store {
    async fn create_bucket(&self, namespace: &str, cr_name: &str, region: &str) -> Result<String> {
        let bucket_name = self.find_bucket_name(cr_name).await?;
        let region = if region.is_empty() {
            self.default_region.as_str()
        } else {
            region
        };

        let mut request = self.client.create_bucket().bucket(&bucket_name);
        if region != "us-east-1" {
            let config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build();
            request = request.create_bucket_configuration(config);
        }

        let result = request.send().await;
        observability::metrics::record_store_operation("create_bucket", result.is_ok());
        result.map_err(|e| {
            anyhow!(
                "while creating bucket {bucket_name} in region {region}: {}",
                DisplayErrorContext(&e)
            )
        })?;

        info!(bucket = %bucket_name, namespace, "Created bucket");
        Ok(bucket_name)
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .is_some_and(HeadBucketError::is_not_found)
                    || err
                        .raw_response()
                        .is_some_and(|raw| raw.status().as_u16() == 404);
                if not_found {
                    Ok(false)
                } else {
                    Err(anyhow!(
                        "while checking if bucket {name} exists: {}",
                        DisplayErrorContext(&err)
                    ))
                }
            }
        }
    }

    async fn delete_bucket(&self, token: &CancellationToken, name: &str) -> Result<()> {
        if !self.bucket_exists(name).await? {
            debug!(bucket = %name, "Bucket already gone");
            return Ok(());
        }

        self.delete_objects(token, name, "").await?;

        let result = self.client.delete_bucket().bucket(name).send().await;
        observability::metrics::record_store_operation("delete_bucket", result.is_ok());
        result.map_err(|e| anyhow!("while deleting bucket {name}: {}", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn set_bucket_policy(&self, name: &str, policy: BucketPolicy) -> Result<()> {
        let result = match render_policy_json(name, policy)? {
            Some(document) => self
                .client
                .put_bucket_policy()
                .bucket(name)
                .policy(document)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| DisplayErrorContext(e).to_string()),
            None => self
                .client
                .delete_bucket_policy()
                .bucket(name)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| DisplayErrorContext(e).to_string()),
        };
        observability::metrics::record_store_operation("set_bucket_policy", result.is_ok());
        result.map_err(|e| anyhow!("while setting policy `{policy}` for bucket {name}: {e}"))
    }

    async fn compare_bucket_policy(&self, name: &str, expected: BucketPolicy) -> Result<bool> {
        let live = self.get_bucket_policy(name).await?;
        policy_matches(name, expected, live.as_deref())
    }

    async fn contains_all_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        files: &[String],
    ) -> Result<bool> {
        let prefix = asset_prefix(asset_name);
        let keys: HashSet<String> = self
            .list_keys(token, bucket, &prefix)
            .await?
            .into_iter()
            .collect();
        Ok(files
            .iter()
            .all(|file| keys.contains(&format!("{prefix}{file}"))))
    }

    async fn put_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        source_base: &Path,
        files: &[String],
    ) -> Result<()> {
        let uploads = stream::iter(
            files
                .iter()
                .map(|file| self.put_object(bucket, asset_name, source_base, file))
                .collect::<Vec<_>>(),
        )
            .buffer_unordered(self.upload_workers)
            .filter_map(|result| async move { result.err().map(|e| format!("{e:#}")) })
            .collect::<Vec<_>>();

        let errors = tokio::select! {
            () = token.cancelled() => return Err(anyhow!("upload to bucket {bucket} cancelled")),
            errors = uploads => errors,
        };

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(errors.join("\n")))
        }
    }

    async fn delete_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<()> {
        let keys = self.list_keys(token, bucket, prefix).await?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut errors = Vec::new();
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .context("while building object identifiers")?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .context("while building delete request")?;

            let output = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await;
            observability::metrics::record_store_operation("delete_objects", output.is_ok());
            let output = output.map_err(|e| {
                anyhow!(
                    "cannot delete objects from bucket {bucket}: {}",
                    DisplayErrorContext(&e)
                )
            })?;

            errors.extend(output.errors().iter().map(|e| {
                format!(
                    "{}: {}",
                    e.key().unwrap_or_default(),
                    e.message().unwrap_or_default()
                )
            }));
        }

        if errors.is_empty() {
            debug!(bucket, prefix, count = keys.len(), "Deleted objects");
            Ok(())
        } else {
            Err(anyhow!(
                "cannot delete objects from bucket {bucket}: {}",
                errors.join(", ")
            ))
        }
    }

    async fn list_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        self.list_keys(token, bucket, prefix).await
    }
}
