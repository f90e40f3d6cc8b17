//! # Custom Resource Definitions
//!
//! CRD types for the Asset Store controllers.
//!
//! ## Module Structure
//!
//! - `bucket.rs` - Bucket spec, status, phases and reasons
//! - `asset.rs` - Asset spec, status, phases and reasons
//! - `common.rs` - Heartbeat helpers and the progress-comparison trait

mod asset;
mod bucket;
mod common;

pub use asset::{
    Asset, AssetBucketRef, AssetFile, AssetMode, AssetPhase, AssetReason, AssetSource, AssetSpec,
    AssetStatus, AssetStatusRef, WebhookService,
};
pub use bucket::{Bucket, BucketPhase, BucketPolicy, BucketReason, BucketSpec, BucketStatus};
pub use common::{format_heartbeat, is_past_relist, parse_heartbeat, PhaseStatus};
