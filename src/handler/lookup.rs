//! # Bucket Lookup
//!
//! Resolves the Bucket an Asset points at.

use crate::crd::{Bucket, BucketStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::Api;
use kube::Client;

/// What an Asset can do with its referenced bucket
#[derive(Debug, Clone, PartialEq)]
pub enum BucketState {
    /// The bucket exists remotely; its status carries `remoteName` and `url`
    Ready(BucketStatus),
    /// Missing, still provisioning, or failed
    NotReady,
}

#[async_trait]
pub trait BucketStatusLookup: Send + Sync {
    /// A missing Bucket is [`BucketState::NotReady`], not an error
    async fn find(&self, namespace: &str, name: &str) -> Result<BucketState>;
}

/// [`BucketStatusLookup`] reading Buckets from the cluster
#[derive(Clone)]
pub struct KubeBucketLookup {
    client: Client,
}

impl std::fmt::Debug for KubeBucketLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBucketLookup").finish_non_exhaustive()
    }
}

impl KubeBucketLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BucketStatusLookup for KubeBucketLookup {
    async fn find(&self, namespace: &str, name: &str) -> Result<BucketState> {
        let api: Api<Bucket> = Api::namespaced(self.client.clone(), namespace);
        let bucket = api
            .get_opt(name)
            .await
            .with_context(|| format!("while reading bucket {namespace}/{name}"))?;

        Ok(match bucket.and_then(|b| b.status) {
            Some(status) if status.is_ready() && !status.remote_name.is_empty() => {
                BucketState::Ready(status)
            }
            _ => BucketState::NotReady,
        })
    }
}
