//! Common test utilities
//!
//! In-memory stand-ins for the object store, content loader, bucket lookup,
//! webhook engines and the cluster API, plus builders for test objects.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use anyhow::{anyhow, Result};
use asset_store_controller::controller::client::{ApiError, ObjectClient};
use asset_store_controller::controller::reconciler::ManagedResource;
use asset_store_controller::crd::{
    format_heartbeat, Asset, AssetPhase, AssetSource, AssetSpec, AssetStatus, Bucket,
    BucketPhase, BucketPolicy, BucketSpec, BucketStatus, WebhookService,
};
use asset_store_controller::handler::{BucketState, BucketStatusLookup};
use asset_store_controller::hook::{
    HookError, HookResult, Message, MetadataExtractor, Mutator, Validator,
};
use asset_store_controller::loader::{LoadedContent, Loader};
use asset_store_controller::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "default";

/// Fixed "now" used by handler tests
pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap()
}

/// A heartbeat far enough in the past to be due for relist
pub fn stale_heartbeat() -> Option<String> {
    Some(format_heartbeat(now() - chrono::Duration::hours(1)))
}

/// A heartbeat inside the relist window
pub fn fresh_heartbeat() -> Option<String> {
    Some(format_heartbeat(now() - chrono::Duration::seconds(1)))
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

pub fn bucket(name: &str, policy: BucketPolicy, generation: i64) -> Bucket {
    let mut bucket = Bucket::new(
        name,
        BucketSpec {
            region: None,
            policy,
        },
    );
    bucket.metadata.namespace = Some(NAMESPACE.to_string());
    bucket.metadata.generation = Some(generation);
    bucket.metadata.resource_version = Some("1".to_string());
    bucket
}

pub fn bucket_status(
    phase: BucketPhase,
    reason: &str,
    generation: i64,
    remote_name: &str,
    heartbeat: Option<String>,
) -> BucketStatus {
    BucketStatus {
        phase: Some(phase),
        reason: reason.to_string(),
        message: String::new(),
        observed_generation: generation,
        last_heartbeat_time: heartbeat,
        remote_name: remote_name.to_string(),
        url: if remote_name.is_empty() {
            String::new()
        } else {
            format!("https://minio.test/{remote_name}")
        },
    }
}

pub fn asset(name: &str, bucket_name: &str, generation: i64) -> Asset {
    let mut asset = Asset::new(
        name,
        AssetSpec {
            bucket_ref: asset_store_controller::crd::AssetBucketRef {
                name: bucket_name.to_string(),
            },
            source: AssetSource {
                url: format!("https://content.test/{name}.tar.gz"),
                ..AssetSource::default()
            },
        },
    );
    asset.metadata.namespace = Some(NAMESPACE.to_string());
    asset.metadata.generation = Some(generation);
    asset.metadata.resource_version = Some("1".to_string());
    asset
}

pub fn asset_status(
    phase: AssetPhase,
    reason: &str,
    generation: i64,
    heartbeat: Option<String>,
) -> AssetStatus {
    AssetStatus {
        phase: Some(phase),
        reason: reason.to_string(),
        observed_generation: generation,
        last_heartbeat_time: heartbeat,
        ..AssetStatus::default()
    }
}

pub fn service(name: &str) -> WebhookService {
    WebhookService {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
        endpoint: "/hook".to_string(),
        filter: None,
    }
}

pub fn mark_deleted<K: kube::Resource>(object: &mut K) {
    object.meta_mut().deletion_timestamp =
        Some(serde_json::from_value(json!(format_heartbeat(now()))).unwrap());
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    /// Remote bucket name -> live policy
    buckets: BTreeMap<String, BucketPolicy>,
    /// Remote bucket name -> object keys
    objects: BTreeMap<String, BTreeSet<String>>,
    calls: Vec<String>,
    failing: HashSet<String>,
    next_bucket_name: Option<String>,
}

/// [`Store`] keeping buckets and object keys in memory and recording every call
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create_bucket` returns this name instead of the CR name
    pub fn with_next_bucket_name(self, name: &str) -> Self {
        self.state.lock().unwrap().next_bucket_name = Some(name.to_string());
        self
    }

    pub fn with_bucket(self, name: &str, policy: BucketPolicy) -> Self {
        self.state
            .lock()
            .unwrap()
            .buckets
            .insert(name.to_string(), policy);
        self
    }

    pub fn with_object(self, bucket: &str, key: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string());
        self
    }

    /// Make `operation` fail from now on
    pub fn fail(&self, operation: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(operation.to_string());
    }

    pub fn recover(&self, operation: &str) {
        self.state.lock().unwrap().failing.remove(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == operation).count()
    }

    pub fn objects(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(bucket)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn policy(&self, bucket: &str) -> Option<BucketPolicy> {
        self.state.lock().unwrap().buckets.get(bucket).copied()
    }

    fn enter(&self, operation: &str) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation.to_string());
        if state.failing.contains(operation) {
            return Err(anyhow!("{operation} failed"));
        }
        Ok(state)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_bucket(&self, _namespace: &str, cr_name: &str, _region: &str) -> Result<String> {
        let mut state = self.enter("create_bucket")?;
        let name = state
            .next_bucket_name
            .clone()
            .unwrap_or_else(|| cr_name.to_string());
        state.buckets.insert(name.clone(), BucketPolicy::None);
        Ok(name)
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        let state = self.enter("bucket_exists")?;
        Ok(state.buckets.contains_key(name))
    }

    async fn delete_bucket(&self, _token: &CancellationToken, name: &str) -> Result<()> {
        let mut state = self.enter("delete_bucket")?;
        state.buckets.remove(name);
        state.objects.remove(name);
        Ok(())
    }

    async fn set_bucket_policy(&self, name: &str, policy: BucketPolicy) -> Result<()> {
        let mut state = self.enter("set_bucket_policy")?;
        state.buckets.insert(name.to_string(), policy);
        Ok(())
    }

    async fn compare_bucket_policy(&self, name: &str, expected: BucketPolicy) -> Result<bool> {
        let state = self.enter("compare_bucket_policy")?;
        Ok(state.buckets.get(name).copied().unwrap_or_default() == expected)
    }

    async fn contains_all_objects(
        &self,
        _token: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        files: &[String],
    ) -> Result<bool> {
        let state = self.enter("contains_all_objects")?;
        let keys = state.objects.get(bucket).cloned().unwrap_or_default();
        Ok(files
            .iter()
            .all(|file| keys.contains(&format!("{asset_name}/{file}"))))
    }

    async fn put_objects(
        &self,
        _token: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        source_base: &Path,
        files: &[String],
    ) -> Result<()> {
        let mut state = self.enter("put_objects")?;
        for file in files {
            if !source_base.join(file).is_file() {
                return Err(anyhow!("{file} is not on disk"));
            }
            state
                .objects
                .entry(bucket.to_string())
                .or_default()
                .insert(format!("{asset_name}/{file}"));
        }
        Ok(())
    }

    async fn delete_objects(
        &self,
        _token: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<()> {
        let mut state = self.enter("delete_objects")?;
        if let Some(keys) = state.objects.get_mut(bucket) {
            keys.retain(|key| !key.starts_with(prefix));
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        _token: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let state = self.enter("list_objects")?;
        Ok(state
            .objects
            .get(bucket)
            .map(|keys| {
                keys.iter()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Content loader
// ---------------------------------------------------------------------------

/// [`Loader`] writing a fixed set of files into a fresh temporary directory
#[derive(Debug, Default)]
pub struct FakeLoader {
    files: Vec<(String, String)>,
    failing: bool,
    loaded: Mutex<Vec<PathBuf>>,
    cleaned: Mutex<Vec<PathBuf>>,
}

impl FakeLoader {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, content)| ((*name).to_string(), (*content).to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn loaded(&self) -> Vec<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<PathBuf> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl Loader for FakeLoader {
    async fn load(
        &self,
        url: &str,
        name: &str,
        _mode: asset_store_controller::crd::AssetMode,
        _filter: Option<&str>,
    ) -> Result<LoadedContent> {
        if self.failing {
            return Err(anyhow!("unable to download {url}"));
        }

        let base_path = tempfile::Builder::new()
            .prefix(&format!("{name}-"))
            .tempdir()?
            .keep();
        let mut files = Vec::new();
        for (file, content) in &self.files {
            let path = base_path.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
            files.push(file.clone());
        }
        files.sort();

        self.loaded.lock().unwrap().push(base_path.clone());
        Ok(LoadedContent { base_path, files })
    }

    async fn clean(&self, base_path: &Path) -> Result<()> {
        self.cleaned.lock().unwrap().push(base_path.to_path_buf());
        match std::fs::remove_dir_all(base_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Bucket lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum LookupAnswer {
    Ready(BucketStatus),
    NotReady,
    Error,
}

#[derive(Debug)]
pub struct FakeBucketLookup {
    answer: Mutex<LookupAnswer>,
}

impl FakeBucketLookup {
    pub fn ready(remote_name: &str) -> Self {
        Self::answering(LookupAnswer::Ready(bucket_status(
            BucketPhase::Ready,
            "BucketPolicyUpdated",
            1,
            remote_name,
            fresh_heartbeat(),
        )))
    }

    pub fn answering(answer: LookupAnswer) -> Self {
        Self {
            answer: Mutex::new(answer),
        }
    }

    pub fn set(&self, answer: LookupAnswer) {
        *self.answer.lock().unwrap() = answer;
    }
}

#[async_trait]
impl BucketStatusLookup for FakeBucketLookup {
    async fn find(&self, namespace: &str, name: &str) -> Result<BucketState> {
        match self.answer.lock().unwrap().clone() {
            LookupAnswer::Ready(status) => Ok(BucketState::Ready(status)),
            LookupAnswer::NotReady => Ok(BucketState::NotReady),
            LookupAnswer::Error => Err(anyhow!("unable to read bucket {namespace}/{name}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Webhook engines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Accept,
    Reject,
    Fatal,
}

/// Mutator, validator and metadata extractor answering with a fixed outcome
#[derive(Debug)]
pub struct FakeHooks {
    outcome: HookOutcome,
    calls: AtomicUsize,
}

impl FakeHooks {
    pub fn new(outcome: HookOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn run(&self, files: &[String]) -> Result<HookResult, HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            HookOutcome::Accept => Ok(HookResult::from_messages(Vec::new())),
            HookOutcome::Reject => Ok(HookResult::from_messages(
                files
                    .iter()
                    .take(1)
                    .map(|file| Message {
                        filename: file.clone(),
                        message: "not allowed".to_string(),
                    })
                    .collect(),
            )),
            HookOutcome::Fatal => Err(HookError::Cancelled),
        }
    }
}

#[async_trait]
impl Mutator for FakeHooks {
    async fn mutate(
        &self,
        _token: &CancellationToken,
        _base_path: &Path,
        files: &[String],
        _services: &[WebhookService],
    ) -> Result<HookResult, HookError> {
        self.run(files)
    }
}

#[async_trait]
impl Validator for FakeHooks {
    async fn validate(
        &self,
        _token: &CancellationToken,
        _base_path: &Path,
        files: &[String],
        _services: &[WebhookService],
    ) -> Result<HookResult, HookError> {
        self.run(files)
    }
}

#[async_trait]
impl MetadataExtractor for FakeHooks {
    async fn extract(
        &self,
        _token: &CancellationToken,
        _base_path: &Path,
        files: &[String],
        _services: &[WebhookService],
    ) -> Result<BTreeMap<String, Value>, HookError> {
        let result = self.run(files)?;
        if !result.success {
            return Err(HookError::Rejected(result.messages));
        }
        Ok(files
            .iter()
            .map(|file| (file.clone(), json!({ "title": file })))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Cluster API
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ClusterState<K> {
    object: Option<K>,
    version: u64,
    conflicts_remaining: u32,
    fail_status_writes: bool,
    replace_calls: usize,
    status_calls: usize,
}

/// Single-object [`ObjectClient`] with resourceVersion checks and injectable conflicts
///
/// Removing the last finalizer from an object that carries a deletion
/// timestamp deletes it, as the API server would.
#[derive(Debug)]
pub struct FakeObjectClient<K> {
    state: Mutex<ClusterState<K>>,
}

impl<K: ManagedResource> FakeObjectClient<K> {
    pub fn new(mut object: K) -> Self {
        object.meta_mut().resource_version = Some("1".to_string());
        Self {
            state: Mutex::new(ClusterState {
                object: Some(object),
                version: 1,
                conflicts_remaining: 0,
                fail_status_writes: false,
                replace_calls: 0,
                status_calls: 0,
            }),
        }
    }

    pub fn empty() -> Self {
        Self {
            state: Mutex::new(ClusterState {
                object: None,
                version: 0,
                conflicts_remaining: 0,
                fail_status_writes: false,
                replace_calls: 0,
                status_calls: 0,
            }),
        }
    }

    /// The next `count` writes answer 409
    pub fn conflict_next(&self, count: u32) {
        self.state.lock().unwrap().conflicts_remaining = count;
    }

    /// Every status write answers 409
    pub fn always_conflict_on_status(&self) {
        self.state.lock().unwrap().fail_status_writes = true;
    }

    pub fn object(&self) -> Option<K> {
        self.state.lock().unwrap().object.clone()
    }

    /// Edit the stored object outside the controller
    pub fn edit(&self, edit: impl FnOnce(&mut K)) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version.to_string();
        if let Some(object) = state.object.as_mut() {
            edit(object);
            object.meta_mut().resource_version = Some(version);
        }
    }

    pub fn replace_calls(&self) -> usize {
        self.state.lock().unwrap().replace_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().unwrap().status_calls
    }

    fn write(&self, object: &K, status_only: bool) -> Result<K, ApiError> {
        let mut state = self.state.lock().unwrap();
        if status_only {
            state.status_calls += 1;
            if state.fail_status_writes {
                return Err(ApiError::Conflict);
            }
        } else {
            state.replace_calls += 1;
        }
        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(ApiError::Conflict);
        }

        let Some(stored) = state.object.clone() else {
            return Err(ApiError::NotFound);
        };
        if stored.meta().resource_version != object.meta().resource_version {
            return Err(ApiError::Conflict);
        }

        let mut updated = if status_only {
            let mut updated = stored;
            if let Some(status) = object.status() {
                updated.set_status(status.clone());
            }
            updated
        } else {
            let mut updated = object.clone();
            if let Some(status) = stored.status() {
                updated.set_status(status.clone());
            }
            updated
        };

        state.version += 1;
        updated.meta_mut().resource_version = Some(state.version.to_string());

        let released = updated.meta().deletion_timestamp.is_some()
            && updated.meta().finalizers.as_ref().is_none_or(Vec::is_empty);
        state.object = if released { None } else { Some(updated.clone()) };
        Ok(updated)
    }
}

#[async_trait]
impl<K: ManagedResource> ObjectClient<K> for FakeObjectClient<K> {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<K, ApiError> {
        self.state
            .lock()
            .unwrap()
            .object
            .clone()
            .ok_or(ApiError::NotFound)
    }

    async fn replace(&self, object: &K) -> Result<K, ApiError> {
        self.write(object, false)
    }

    async fn replace_status(&self, object: &K) -> Result<K, ApiError> {
        self.write(object, true)
    }
}
