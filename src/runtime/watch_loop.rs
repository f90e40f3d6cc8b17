//! # Watch Loop
//!
//! Runs the Bucket and Asset controllers side by side until a shutdown signal
//! arrives. Each controller watches its kind in every namespace and requeues
//! converged objects after its relist interval.

use crate::config::KindConfig;
use crate::constants::DELETE_FINALIZER_NAME;
use crate::controller::client::{KubeObjectClient, ReflectorCache};
use crate::controller::reconciler::{reconcile, ManagedResource, PhaseHandler, Reconciler};
use crate::controller::retry::RetryPolicy;
use crate::crd::{Asset, Bucket};
use crate::finalizer::FinalizerManager;
use crate::handler::{AssetHandler, BucketHandler, KubeBucketLookup};
use crate::runtime::error_policy::handle_reconciliation_error;
use crate::runtime::initialization::InitializationResult;
use futures::StreamExt;
use kube::api::Api;
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::Ordering;
use std::sync::Arc;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Run both controllers until shutdown
pub async fn run_watch_loop(init: InitializationResult) -> Result<(), anyhow::Error> {
    let InitializationResult {
        client,
        config,
        server_state,
        shutdown,
        store,
        loader,
        validator,
        mutator,
        metadata_extractor,
        recorder,
    } = init;

    // Mark the pod unready as soon as SIGTERM/SIGINT arrives; in-flight passes are cancelled
    let shutdown_server_state = Arc::clone(&server_state);
    let shutdown_token = shutdown.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
                shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
                shutdown_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signals"),
        }
    });

    let retry_policy = RetryPolicy::from_config(&config.conflict_retry);

    let bucket_handler = Arc::new(BucketHandler::new(
        Arc::clone(&store),
        Arc::clone(&recorder),
        config.store.external_endpoint.clone(),
        config.bucket.relist_interval(),
    ));
    let buckets = run_controller::<Bucket>(
        client.clone(),
        &config.bucket,
        bucket_handler,
        retry_policy.clone(),
        &shutdown,
    );

    let asset_handler = Arc::new(AssetHandler::new(
        Arc::new(KubeBucketLookup::new(client.clone())),
        store,
        loader,
        validator,
        mutator,
        metadata_extractor,
        recorder,
        config.asset.relist_interval(),
    ));
    let assets = run_controller::<Asset>(
        client,
        &config.asset,
        asset_handler,
        retry_policy,
        &shutdown,
    );

    tokio::join!(buckets, assets);

    shutdown.cancel();
    info!("Controllers stopped gracefully");
    Ok(())
}

/// Resolves once SIGINT or SIGTERM is received
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

async fn run_controller<K>(
    client: Client,
    kind_config: &KindConfig,
    handler: Arc<dyn PhaseHandler<K>>,
    retry_policy: RetryPolicy,
    shutdown: &CancellationToken,
) where
    K: ManagedResource + serde::de::DeserializeOwned + serde::Serialize,
{
    let api: Api<K> = Api::all(client.clone());
    let controller = Controller::new(api, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(kind_config.max_concurrent_reconciles));

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeObjectClient::<K>::new(client)),
        Arc::new(ReflectorCache::new(controller.store())),
        handler,
        FinalizerManager::new(DELETE_FINALIZER_NAME),
        retry_policy,
        kind_config.relist_interval(),
        shutdown.child_token(),
    ));

    info!(
        kind = K::KIND,
        concurrency = kind_config.max_concurrent_reconciles,
        relist_interval_secs = kind_config.relist_interval().as_secs(),
        "Starting controller"
    );

    let watch_span = tracing::info_span!("controller.watch", resource.kind = K::KIND);
    controller
        .shutdown_on_signal()
        .run(reconcile::<K>, handle_reconciliation_error::<K>, reconciler)
        .for_each(|result| {
            match result {
                Ok((object, action)) => {
                    debug!(resource = %object, ?action, "watch.event.success");
                }
                Err(e) => {
                    warn!(error = %e, "watch.event.error");
                }
            }
            futures::future::ready(())
        })
        .instrument(watch_span)
        .await;

    info!(kind = K::KIND, "Controller stopped");
}
