//! # Metadata Extractor
//!
//! Sends files to metadata webhooks and collects the JSON each one returns,
//! keyed by file name.

use super::processor::{HookPolicy, HookProcessor};
use super::types::{HookError, HookKind};
use super::MetadataExtractor;
use crate::crd::WebhookService;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct MetadataPolicy;

#[async_trait]
impl HookPolicy for MetadataPolicy {
    type Output = Value;

    async fn on_success(
        &self,
        _: &Path,
        file: &str,
        body: Vec<u8>,
    ) -> Result<Self::Output, HookError> {
        serde_json::from_slice(&body).map_err(|source| HookError::InvalidResponse {
            file: file.to_string(),
            source,
        })
    }
}

/// Webhook-backed [`MetadataExtractor`]
#[derive(Debug)]
pub struct MetadataEngine {
    processor: HookProcessor<MetadataPolicy>,
}

impl MetadataEngine {
    pub fn new(client: reqwest::Client, timeout: Duration, workers: usize) -> Self {
        Self {
            processor: HookProcessor::new(
                HookKind::Metadata,
                client,
                timeout,
                workers,
                MetadataPolicy,
            ),
        }
    }
}

#[async_trait]
impl MetadataExtractor for MetadataEngine {
    async fn extract(
        &self,
        token: &CancellationToken,
        base_path: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<BTreeMap<String, Value>, HookError> {
        let output = self
            .processor
            .process(token, base_path, files, services)
            .await?;
        if !output.messages.is_empty() {
            return Err(HookError::Rejected(output.messages));
        }

        let mut merged = BTreeMap::new();
        for (file, metadata) in output.outputs {
            merge_into(&mut merged, file, metadata);
        }
        Ok(merged)
    }
}

/// Later services add keys to (or override keys of) earlier object results
fn merge_into(merged: &mut BTreeMap<String, Value>, file: String, metadata: Value) {
    match (merged.get_mut(&file), metadata) {
        (Some(Value::Object(existing)), Value::Object(update)) => existing.extend(update),
        (_, metadata) => {
            merged.insert(file, metadata);
        }
    }
}
