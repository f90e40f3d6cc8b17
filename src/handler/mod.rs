//! # Phase Handlers
//!
//! Per-kind state machines computing the next status of a Bucket or an Asset.
//! Handlers talk to the object store, the content loader and the webhook
//! engines, and never write to the cluster API themselves.
//!
//! - `bucket.rs` - Bucket state machine
//! - `asset.rs` - Asset state machine
//! - `lookup.rs` - Bucket status lookup for assets

mod asset;
mod bucket;
mod lookup;

pub use asset::AssetHandler;
pub use bucket::BucketHandler;
pub use lookup::{BucketState, BucketStatusLookup, KubeBucketLookup};

use crate::events::EventRecorder;
use kube::Resource;
use kube_runtime::events::EventType;

/// Publish a Normal (`warning == false`) or Warning event about `object`
async fn emit<K>(recorder: &dyn EventRecorder, object: &K, warning: bool, reason: &str, note: String)
where
    K: Resource<DynamicType = ()>,
{
    let type_ = if warning {
        EventType::Warning
    } else {
        EventType::Normal
    };
    recorder
        .record(&object.object_ref(&()), type_, reason, note)
        .await;
}

/// Render an error chain on one line for status messages
fn describe(error: &anyhow::Error) -> String {
    format!("{error:#}")
}
