//! # Webhook Hooks
//!
//! Validation, mutation and metadata extraction of asset content through
//! external HTTP services.
//!
//! All three engines run on the shared [`HookProcessor`]: each file is POSTed as
//! the raw request body, `2xx` is success, `422` is a soft rejection reported as
//! a [`Message`], and anything else (or a transport or local I/O failure) is
//! fatal and aborts the run.

mod metadata;
mod mutator;
mod processor;
mod types;
mod validator;

pub use metadata::MetadataEngine;
pub use mutator::MutationEngine;
pub use processor::{service_url, HookPolicy, HookProcessor, ProcessOutput};
pub use types::{summarize, HookError, HookKind, HookResult, Message};
pub use validator::ValidationEngine;

use crate::crd::WebhookService;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Rewrites files in place through mutation webhooks
#[async_trait]
pub trait Mutator: Send + Sync {
    /// `Err` only for fatal failures; soft rejections land in [`HookResult::messages`]
    async fn mutate(
        &self,
        token: &CancellationToken,
        base_path: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<HookResult, HookError>;
}

/// Accepts or rejects files through validation webhooks
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        token: &CancellationToken,
        base_path: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<HookResult, HookError>;
}

/// Collects per-file metadata from metadata webhooks
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Soft rejections are returned as [`HookError::Rejected`]
    async fn extract(
        &self,
        token: &CancellationToken,
        base_path: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<BTreeMap<String, Value>, HookError>;
}
