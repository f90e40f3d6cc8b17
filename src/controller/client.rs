//! # Cluster Client
//!
//! Narrow get/replace access to custom resources plus the watch-cache resync
//! wait used after a version conflict.

use crate::constants::CACHE_SYNC_POLL_INTERVAL_MS;
use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome classes of a cluster API call
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("object not found")]
    NotFound,
    #[error("object was modified concurrently (resourceVersion conflict)")]
    Conflict,
    #[error("cluster API error: {0}")]
    Other(String),
}

impl ApiError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict)
    }
}

impl From<kube::Error> for ApiError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(api_err) if api_err.code == 404 => ApiError::NotFound,
            kube::Error::Api(api_err) if api_err.code == 409 => ApiError::Conflict,
            _ => ApiError::Other(error.to_string()),
        }
    }
}

/// Get and optimistic-concurrency writes for one resource kind
///
/// Writes carry the object's `resourceVersion`; a stale one yields
/// [`ApiError::Conflict`].
#[async_trait]
pub trait ObjectClient<K>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<K, ApiError>;

    /// Write the whole object (used for finalizer changes)
    async fn replace(&self, object: &K) -> Result<K, ApiError>;

    /// Write the status subresource
    async fn replace_status(&self, object: &K) -> Result<K, ApiError>;
}

/// [`ObjectClient`] backed by `kube::Api`
pub struct KubeObjectClient<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for KubeObjectClient<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeObjectClient").finish_non_exhaustive()
    }
}

impl<K> KubeObjectClient<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeObjectClient<K>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> ObjectClient<K> for KubeObjectClient<K>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, ApiError> {
        Ok(self.api(namespace).get(name).await?)
    }

    async fn replace(&self, object: &K) -> Result<K, ApiError> {
        let namespace = object.namespace().unwrap_or_default();
        Ok(self
            .api(&namespace)
            .replace(&object.name_any(), &PostParams::default(), object)
            .await?)
    }

    async fn replace_status(&self, object: &K) -> Result<K, ApiError> {
        let namespace = object.namespace().unwrap_or_default();
        let data = serde_json::to_vec(object)
            .map_err(|e| ApiError::Other(format!("while serializing status: {e}")))?;
        Ok(self
            .api(&namespace)
            .replace_status(&object.name_any(), &PostParams::default(), data)
            .await?)
    }
}

/// Waits for the local watch cache to catch up with the API server
#[async_trait]
pub trait CacheSync: Send + Sync {
    /// `true` once the cached copy no longer carries `stale_version`
    ///
    /// Returns `false` on timeout or cancellation.
    async fn wait_for_sync(
        &self,
        token: &CancellationToken,
        namespace: &str,
        name: &str,
        stale_version: Option<&str>,
        timeout: Duration,
    ) -> bool;
}

/// [`CacheSync`] over a controller's reflector store
pub struct ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + 'static,
{
    store: Store<K>,
}

impl<K> std::fmt::Debug for ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectorCache")
            .field("cached", &self.store.state().len())
            .finish()
    }
}

impl<K> ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    #[must_use]
    pub fn new(store: Store<K>) -> Self {
        Self { store }
    }

    fn is_synced(&self, namespace: &str, name: &str, stale_version: Option<&str>) -> bool {
        let key = ObjectRef::new(name).within(namespace);
        match self.store.get(&key) {
            // gone from the cache: the next get reports not-found
            None => true,
            Some(cached) => cached.resource_version().as_deref() != stale_version,
        }
    }
}

#[async_trait]
impl<K> CacheSync for ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn wait_for_sync(
        &self,
        token: &CancellationToken,
        namespace: &str,
        name: &str,
        stale_version: Option<&str>,
        timeout: Duration,
    ) -> bool {
        let poll = async {
            loop {
                if self.is_synced(namespace, name, stale_version) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(CACHE_SYNC_POLL_INTERVAL_MS)).await;
            }
        };

        tokio::select! {
            () = token.cancelled() => false,
            synced = tokio::time::timeout(timeout, poll) => {
                let synced = synced.unwrap_or(false);
                if !synced {
                    debug!(resource.name = name, resource.namespace = namespace, "Watch cache did not catch up before timeout");
                }
                synced
            }
        }
    }
}

/// [`CacheSync`] that reports success immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCacheSync;

#[async_trait]
impl CacheSync for NoCacheSync {
    async fn wait_for_sync(
        &self,
        token: &CancellationToken,
        _: &str,
        _: &str,
        _: Option<&str>,
        _: Duration,
    ) -> bool {
        !token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Bucket, BucketSpec};
    use kube_runtime::reflector;
    use kube_runtime::watcher;

    fn bucket(version: &str) -> Bucket {
        let mut bucket = Bucket::new("docs", BucketSpec::default());
        bucket.metadata.namespace = Some("default".to_string());
        bucket.metadata.resource_version = Some(version.to_string());
        bucket
    }

    #[tokio::test]
    async fn test_reflector_cache_detects_newer_version() {
        let (store, mut writer) = reflector::store::<Bucket>();
        writer.apply_watcher_event(&watcher::Event::Apply(bucket("1")));
        let cache = ReflectorCache::new(store);
        let token = CancellationToken::new();

        assert!(
            !cache
                .wait_for_sync(&token, "default", "docs", Some("1"), Duration::from_millis(120))
                .await
        );

        writer.apply_watcher_event(&watcher::Event::Apply(bucket("2")));
        assert!(
            cache
                .wait_for_sync(&token, "default", "docs", Some("1"), Duration::from_millis(120))
                .await
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let (store, mut writer) = reflector::store::<Bucket>();
        writer.apply_watcher_event(&watcher::Event::Apply(bucket("1")));
        let cache = ReflectorCache::new(store);
        let token = CancellationToken::new();
        token.cancel();

        assert!(
            !cache
                .wait_for_sync(&token, "default", "docs", Some("1"), Duration::from_secs(30))
                .await
        );
    }

    #[test]
    fn test_api_error_predicates() {
        assert!(ApiError::NotFound.is_not_found());
        assert!(ApiError::Conflict.is_conflict());
        assert!(!ApiError::Other("x".to_string()).is_conflict());
    }
}
