//! # Hook Processor
//!
//! Bounded worker pool that sends files to webhook services and collects one
//! outcome per `(file, service)` pair.
//!
//! Every `(file, service)` unit goes into one shared queue drained by `workers`
//! tasks that report into a single result channel; the collector counts results
//! until every submitted unit has reported. Policies that rewrite files ask for
//! ordered services instead, which runs one stage per service so a mutation from
//! one service is visible to the next. The first fatal outcome cancels the stage
//! and discards everything collected so far.

use super::types::{HookError, HookKind, Message};
use crate::crd::WebhookService;
use crate::observability;
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How an engine interprets webhook responses
#[async_trait]
pub trait HookPolicy: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Run services in declaration order, each seeing the previous one's output
    const ORDERED_SERVICES: bool = false;

    /// Called with the body of a 2xx response; an error here is fatal for the run
    async fn on_success(
        &self,
        base_path: &Path,
        file: &str,
        body: Vec<u8>,
    ) -> Result<Self::Output, HookError>;

    /// Called with the body of a 422 response; must only ever produce a soft message
    fn on_fail(&self, file: &str, body: &[u8]) -> Message {
        Message {
            filename: file.to_string(),
            message: String::from_utf8_lossy(body).trim().to_string(),
        }
    }
}

/// Everything a successful run produced
#[derive(Debug)]
pub struct ProcessOutput<T> {
    /// Policy output per `(file, service)` pair that returned 2xx
    pub outputs: Vec<(String, T)>,
    /// Soft rejections
    pub messages: Vec<Message>,
}

impl<T> Default for ProcessOutput<T> {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
            messages: Vec::new(),
        }
    }
}

/// Result record sent from a worker to the collector
enum Outcome<T> {
    Success {
        service: usize,
        file: String,
        output: T,
    },
    Rejected(Message),
    Fatal(HookError),
}

struct WorkUnit {
    service: usize,
    file: String,
    url: String,
}

/// Fan-out/fan-in executor shared by the three engines
pub struct HookProcessor<P: HookPolicy> {
    kind: HookKind,
    client: reqwest::Client,
    timeout: Duration,
    workers: usize,
    policy: Arc<P>,
}

impl<P: HookPolicy> std::fmt::Debug for HookProcessor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookProcessor")
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl<P: HookPolicy> HookProcessor<P> {
    pub fn new(
        kind: HookKind,
        client: reqwest::Client,
        timeout: Duration,
        workers: usize,
        policy: P,
    ) -> Self {
        Self {
            kind,
            client,
            timeout,
            workers: workers.max(1),
            policy: Arc::new(policy),
        }
    }

    /// Send every file under `base_path` to every service
    ///
    /// Each submitted `(file, service)` unit yields exactly one outcome.
    /// Outputs are ordered by service.
    pub async fn process(
        &self,
        token: &CancellationToken,
        base_path: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<ProcessOutput<P::Output>, HookError> {
        if !P::ORDERED_SERVICES {
            let mut units = Vec::new();
            for (index, service) in services.iter().enumerate() {
                units.extend(self.service_units(index, service, files)?);
            }
            return self.run_stage(token, base_path, units).await;
        }

        let mut output = ProcessOutput::default();
        for (index, service) in services.iter().enumerate() {
            let units = self.service_units(index, service, files)?;
            if units.is_empty() {
                continue;
            }

            let stage = self.run_stage(token, base_path, units).await?;
            output.outputs.extend(stage.outputs);
            output.messages.extend(stage.messages);
        }

        Ok(output)
    }

    fn service_units(
        &self,
        index: usize,
        service: &WebhookService,
        files: &[String],
    ) -> Result<Vec<WorkUnit>, HookError> {
        let units = units_for(index, service, files)?;
        if units.is_empty() {
            debug!(
                hook = self.kind.as_str(),
                service = %service.name,
                "No files match service filter, skipping"
            );
        }
        Ok(units)
    }

    async fn run_stage(
        &self,
        token: &CancellationToken,
        base_path: &Path,
        units: Vec<WorkUnit>,
    ) -> Result<ProcessOutput<P::Output>, HookError> {
        let stage_token = token.child_token();
        let submitted = units.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(units)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for _ in 0..self.workers.min(submitted) {
            let worker = Worker {
                kind: self.kind,
                client: self.client.clone(),
                timeout: self.timeout,
                policy: Arc::clone(&self.policy),
                base_path: base_path.to_path_buf(),
            };
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let worker_token = stage_token.clone();
            workers.spawn(worker.drain(queue, tx, worker_token));
        }
        drop(tx);

        let mut outputs = Vec::new();
        let mut messages = Vec::new();
        let mut received = 0;
        while received < submitted {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => {
                    stage_token.cancel();
                    return Err(HookError::Cancelled);
                }
                outcome = rx.recv() => outcome,
            };
            let Some(outcome) = outcome else {
                return Err(HookError::WorkerLost);
            };
            received += 1;

            match outcome {
                Outcome::Success {
                    service,
                    file,
                    output,
                } => outputs.push((service, file, output)),
                Outcome::Rejected(message) => messages.push(message),
                Outcome::Fatal(err) => {
                    warn!(hook = self.kind.as_str(), error = %err, "Webhook run aborted");
                    stage_token.cancel();
                    return Err(err);
                }
            }
        }

        while workers.join_next().await.is_some() {}

        outputs.sort_by_key(|(service, _, _)| *service);
        Ok(ProcessOutput {
            outputs: outputs
                .into_iter()
                .map(|(_, file, output)| (file, output))
                .collect(),
            messages,
        })
    }
}

struct Worker<P: HookPolicy> {
    kind: HookKind,
    client: reqwest::Client,
    timeout: Duration,
    policy: Arc<P>,
    base_path: PathBuf,
}

impl<P: HookPolicy> Worker<P> {
    async fn drain(
        self,
        queue: Arc<Mutex<VecDeque<WorkUnit>>>,
        results: mpsc::UnboundedSender<Outcome<P::Output>>,
        token: CancellationToken,
    ) {
        loop {
            let next = match queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => None,
            };
            let Some(unit) = next else {
                break;
            };

            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => break,
                outcome = self.call(unit) => outcome,
            };

            if results.send(outcome).is_err() {
                break;
            }
        }
    }

    async fn call(&self, unit: WorkUnit) -> Outcome<P::Output> {
        let started = Instant::now();
        let outcome = self.exchange(unit).await;

        let label = match &outcome {
            Outcome::Success { .. } => "success",
            Outcome::Rejected(_) => "rejected",
            Outcome::Fatal(_) => "error",
        };
        observability::metrics::record_webhook_call(
            self.kind.as_str(),
            label,
            started.elapsed().as_secs_f64(),
        );
        outcome
    }

    async fn exchange(&self, unit: WorkUnit) -> Outcome<P::Output> {
        let WorkUnit { service, file, url } = unit;

        let content = match tokio::fs::File::open(self.base_path.join(&file)).await {
            Ok(content) => content,
            Err(source) => return Outcome::Fatal(HookError::ReadFile { file, source }),
        };

        let response = match self
            .client
            .post(&url)
            .timeout(self.timeout)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(content)))
            .send()
            .await
        {
            Ok(response) => response,
            Err(source) => return Outcome::Fatal(HookError::Transport { url, file, source }),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(source) => return Outcome::Fatal(HookError::Transport { url, file, source }),
        };

        if status.is_success() {
            match self.policy.on_success(&self.base_path, &file, body).await {
                Ok(output) => Outcome::Success {
                    service,
                    file,
                    output,
                },
                Err(err) => Outcome::Fatal(err),
            }
        } else if status == StatusCode::UNPROCESSABLE_ENTITY {
            Outcome::Rejected(self.policy.on_fail(&file, &body))
        } else {
            Outcome::Fatal(HookError::UnexpectedStatus {
                url,
                file,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }
}

/// Resolve the URL a service is reached at
///
/// Absolute `http(s)://` endpoints are used verbatim; anything else is a path on
/// the in-cluster service `<name>.<namespace>`.
#[must_use]
pub fn service_url(service: &WebhookService) -> String {
    let endpoint = service.endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let path = if endpoint.is_empty() || endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    };
    format!(
        "http://{}.{}.svc.cluster.local{}",
        service.name, service.namespace, path
    )
}

fn units_for(
    index: usize,
    service: &WebhookService,
    files: &[String],
) -> Result<Vec<WorkUnit>, HookError> {
    let filter = match service.filter.as_deref().filter(|f| !f.is_empty()) {
        Some(filter) => Some(Regex::new(filter).map_err(|source| HookError::InvalidFilter {
            service: service.name.clone(),
            filter: filter.to_string(),
            source,
        })?),
        None => None,
    };

    let url = service_url(service);
    Ok(files
        .iter()
        .filter(|file| filter.as_ref().is_none_or(|re| re.is_match(file)))
        .map(|file| WorkUnit {
            service: index,
            file: file.clone(),
            url: url.clone(),
        })
        .collect())
}
