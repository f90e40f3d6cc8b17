//! # Validator
//!
//! Sends files to validation webhooks. A 2xx response accepts the file; the
//! body is ignored.

use super::processor::{HookPolicy, HookProcessor};
use super::types::{HookError, HookKind, HookResult};
use super::Validator;
use crate::crd::WebhookService;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ValidationPolicy;

#[async_trait]
impl HookPolicy for ValidationPolicy {
    type Output = ();

    async fn on_success(&self, _: &Path, _: &str, _: Vec<u8>) -> Result<Self::Output, HookError> {
        Ok(())
    }
}

/// Webhook-backed [`Validator`]
#[derive(Debug)]
pub struct ValidationEngine {
    processor: HookProcessor<ValidationPolicy>,
}

impl ValidationEngine {
    pub fn new(client: reqwest::Client, timeout: Duration, workers: usize) -> Self {
        Self {
            processor: HookProcessor::new(
                HookKind::Validation,
                client,
                timeout,
                workers,
                ValidationPolicy,
            ),
        }
    }
}

#[async_trait]
impl Validator for ValidationEngine {
    async fn validate(
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
