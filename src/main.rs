//! # Asset Store Controller
//!
//! Kubernetes controllers that keep `Bucket` and `Asset` resources in sync with
//! S3-compatible object storage.
//!
//! ## Overview
//!
//! - **Bucket** - provisions a uniquely named remote bucket and keeps its access policy
//! - **Asset** - pulls content from a URL (a single file or an archive), runs it through
//!   mutation, validation and metadata webhooks, and uploads it into the referenced bucket
//!
//! Both resources carry a finalizer so remote content is removed before the
//! object disappears from the cluster.
//!
//! ## Features
//!
//! - **Periodic relist**: Ready resources are re-verified against the store
//! - **Conflict-safe writes**: status and finalizer updates retry on 409
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::Result;
use asset_store_controller::runtime::{initialization, watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialization::initialize().await?;
    watch_loop::run_watch_loop(init).await
}
