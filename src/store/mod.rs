//! # Object Store
//!
//! Bucket and object operations against an S3-compatible store.
//!
//! - `s3.rs` - `aws-sdk-s3` implementation (MinIO, AWS S3)
//! - `policy.rs` - bucket policy rendering and comparison

pub mod policy;
mod s3;

pub use s3::{generate_bucket_name, S3Store};

use crate::crd::BucketPolicy;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Object store operations used by the Bucket and Asset handlers
///
/// Implementations are shared by every concurrent reconcile and must tolerate
/// concurrent use.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a bucket with a generated, unused name and return that name
    async fn create_bucket(&self, namespace: &str, cr_name: &str, region: &str) -> Result<String>;

    async fn bucket_exists(&self, name: &str) -> Result<bool>;

    /// Empty and remove a bucket; a bucket that is already gone is not an error
    async fn delete_bucket(&self, token: &CancellationToken, name: &str) -> Result<()>;

    async fn set_bucket_policy(&self, name: &str, policy: BucketPolicy) -> Result<()>;

    /// `true` when the live policy grants exactly what `expected` declares
    async fn compare_bucket_policy(&self, name: &str, expected: BucketPolicy) -> Result<bool>;

    /// `true` when every `<asset_name>/<file>` exists in the bucket
    async fn contains_all_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        files: &[String],
    ) -> Result<bool>;

    /// Upload `source_base/<file>` to `<asset_name>/<file>` for every file
    async fn put_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        source_base: &Path,
        files: &[String],
    ) -> Result<()>;

    async fn delete_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<()>;

    /// Object keys under `prefix`
    async fn list_objects(
        &self,
        token: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>>;
}

/// Object-key prefix holding an asset's content
#[must_use]
pub fn asset_prefix(asset_name: &str) -> String {
    format!("{asset_name}/")
}
