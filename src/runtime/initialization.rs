//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup and the external collaborators
//! (object store, content loader, webhook engines, event recorder).

use crate::config::ControllerConfig;
use crate::constants::{
    CONTROLLER_NAME, DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
};
use crate::events::{EventRecorder, KubeEventRecorder};
use crate::hook::{MetadataEngine, MetadataExtractor, MutationEngine, Mutator, ValidationEngine, Validator};
use crate::loader::{HttpLoader, Loader};
use crate::observability;
use crate::server::{start_server, ServerState};
use crate::store::{S3Store, Store};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Initialization result containing all necessary components for the controllers
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Configuration loaded from the environment
    pub config: ControllerConfig,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Cancelled on shutdown; parent of every reconcile pass token
    pub shutdown: CancellationToken,
    pub store: Arc<dyn Store>,
    pub loader: Arc<dyn Loader>,
    pub validator: Arc<dyn Validator>,
    pub mutator: Arc<dyn Mutator>,
    pub metadata_extractor: Arc<dyn MetadataExtractor>,
    pub recorder: Arc<dyn EventRecorder>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field(
                "server_ready",
                &self.server_state.is_ready.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Object store, loader and webhook engine construction
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = ControllerConfig::from_env();
    observability::logging::init_logging(&config.log_format)?;

    info!("Starting Asset Store Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(?config, "Configuration loaded");

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());

    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to create HTTP client")?;

    let store: Arc<dyn Store> = Arc::new(S3Store::from_config(&config.store).await);
    let loader: Arc<dyn Loader> = Arc::new(HttpLoader::new(http.clone(), &config.loader));
    let validator: Arc<dyn Validator> = Arc::new(ValidationEngine::new(
        http.clone(),
        config.validation_webhook.timeout(),
        config.validation_webhook.workers_count,
    ));
    let mutator: Arc<dyn Mutator> = Arc::new(MutationEngine::new(
        http.clone(),
        config.mutation_webhook.timeout(),
        config.mutation_webhook.workers_count,
    ));
    let metadata_extractor: Arc<dyn MetadataExtractor> = Arc::new(MetadataEngine::new(
        http,
        config.metadata_webhook.timeout(),
        config.metadata_webhook.workers_count,
    ));
    let recorder: Arc<dyn EventRecorder> =
        Arc::new(KubeEventRecorder::new(client.clone(), CONTROLLER_NAME));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        config,
        server_state,
        shutdown: CancellationToken::new(),
        store,
        loader,
        validator,
        mutator,
        metadata_extractor,
        recorder,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        // set by start_server once bound
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}
