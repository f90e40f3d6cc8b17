//! # Mutator
//!
//! Sends files to mutation webhooks and overwrites each file with the
//! returned body.

use super::processor::{HookPolicy, HookProcessor};
use super::types::{HookError, HookKind, HookResult};
use super::Mutator;
use crate::crd::WebhookService;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct MutationPolicy;

#[async_trait]
impl HookPolicy for MutationPolicy {
    type Output = ();

    const ORDERED_SERVICES: bool = true;

    async fn on_success(
        &self,
        base_path: &Path,
        file: &str,
        body: Vec<u8>,
    ) -> Result<Self::Output, HookError> {
        tokio::fs::write(base_path.join(file), body)
            .await
            .map_err(|source| HookError::WriteFile {
                file: file.to_string(),
                source,
            })
    }
}

/// Webhook-backed [`Mutator`]
#[derive(Debug)]
pub struct MutationEngine {
    processor: HookProcessor<MutationPolicy>,
}

impl MutationEngine {
    pub fn new(client: reqwest::Client, timeout: Duration, workers: usize) -> Self {
        Self {
            processor: HookProcessor::new(
                HookKind::Mutation,
                client,
                timeout,
                workers,
                MutationPolicy,
            ),
        }
    }
}

#[async_trait]
impl Mutator for MutationEngine {
    async fn mutate(
        &self,
        token: &CancellationToken,
        base_path: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<HookResult, HookError> {
        let output = self
            .processor
            .process(token, base_path, files, services)
            .await?;
        Ok(HookResult::from_messages(output.messages))
    }
}
