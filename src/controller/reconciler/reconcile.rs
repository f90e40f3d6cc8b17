//! # Reconcile
//!
//! One convergence pass: ensure the finalizer, run the phase handler, persist
//! the status it returns and either release the object (when deleting) or
//! schedule the next relist.

use crate::controller::client::ApiError;
use crate::controller::reconciler::types::{
    resource_key, ManagedResource, Reconciler, ReconcilerError, Transition, TriggerSource,
};
use crate::controller::retry::{update_with_retry, RetryError, UpdateTarget};
use crate::crd::PhaseStatus;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, Instrument};

/// Reconcile one object
pub async fn reconcile<K: ManagedResource>(
    obj: Arc<K>,
    ctx: Arc<Reconciler<K>>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let span = tracing::info_span!(
        "controller.reconcile",
        resource.kind = K::KIND,
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.generation = obj.meta().generation.unwrap_or(0),
    );

    reconcile_pass::<K>(&obj, &ctx, &namespace, &name)
        .instrument(span)
        .await
}

async fn reconcile_pass<K: ManagedResource>(
    obj: &K,
    ctx: &Reconciler<K>,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    observability::increment_reconciliations(K::KIND);

    // cancelled when this pass ends, whatever the outcome
    let token = ctx.shutdown.child_token();
    let _pass_guard = token.clone().drop_guard();

    if obj.meta().deletion_timestamp.is_none() && !ctx.finalizer.is_defined_in(obj) {
        update_with_retry(
            ctx.client.as_ref(),
            ctx.cache.as_ref(),
            &ctx.retry_policy,
            &token,
            K::KIND,
            namespace,
            name,
            UpdateTarget::Object,
            |object: &mut K| {
                object.meta().deletion_timestamp.is_none() && ctx.finalizer.add_to(object)
            },
        )
        .await
        .map_err(ReconcilerError::AddFinalizer)?;
        debug!("Finalizer ensured");
    }

    let current = match ctx.client.get(namespace, name).await {
        Ok(current) => current,
        Err(ApiError::NotFound) => {
            debug!("Object is gone, nothing to reconcile");
            forget_backoff(ctx, namespace, name);
            return Ok(Action::await_change());
        }
        Err(e) => return Err(ReconcilerError::Fetch(e)),
    };

    let Transition {
        status,
        error: handler_error,
    } = ctx.handler.handle(&token, chrono::Utc::now(), &current).await;

    let status_error = match status {
        Some(status) => persist_status(ctx, &token, &current, status, namespace, name).await,
        None => None,
    };

    match (handler_error, status_error) {
        (Some(handler), Some(status)) => {
            return Err(ReconcilerError::Combined { handler, status })
        }
        (Some(handler), None) => return Err(ReconcilerError::Handler(handler)),
        (None, Some(status)) => return Err(ReconcilerError::Status(status)),
        (None, None) => {}
    }

    reset_backoff(ctx, namespace, name);
    observability::observe_reconciliation_duration(K::KIND, start.elapsed().as_secs_f64());

    if current.meta().deletion_timestamp.is_some() {
        update_with_retry(
            ctx.client.as_ref(),
            ctx.cache.as_ref(),
            &ctx.retry_policy,
            &token,
            K::KIND,
            namespace,
            name,
            UpdateTarget::Object,
            |object: &mut K| ctx.finalizer.delete_from(object),
        )
        .await
        .map_err(ReconcilerError::RemoveFinalizer)?;
        info!("Finalizer removed, object released for deletion");
        forget_backoff(ctx, namespace, name);
        return Ok(Action::await_change());
    }

    debug!(
        requeue_after_secs = ctx.relist_interval.as_secs(),
        "Reconciliation complete"
    );
    observability::increment_requeues_total(TriggerSource::Relist.as_str());
    Ok(Action::requeue(ctx.relist_interval))
}

/// Write `status` unless it carries the same progress as the stored one
async fn persist_status<K: ManagedResource>(
    ctx: &Reconciler<K>,
    token: &tokio_util::sync::CancellationToken,
    current: &K,
    status: K::Status,
    namespace: &str,
    name: &str,
) -> Option<RetryError> {
    if current
        .status()
        .is_some_and(|stored| stored.same_progress_as(&status))
    {
        debug!(
            phase = status.phase_str(),
            reason = status.reason(),
            "Status unchanged, skipping write"
        );
        observability::increment_status_updates(K::KIND, "skipped");
        return None;
    }

    let result = update_with_retry(
        ctx.client.as_ref(),
        ctx.cache.as_ref(),
        &ctx.retry_policy,
        token,
        K::KIND,
        namespace,
        name,
        UpdateTarget::Status,
        |object: &mut K| {
            object.set_status(status.clone());
            true
        },
    )
    .await;

    match result {
        Ok(_) => {
            info!(
                phase = status.phase_str(),
                reason = status.reason(),
                "Status updated"
            );
            observability::increment_status_updates(K::KIND, "written");
            None
        }
        Err(e) => {
            observability::increment_status_updates(K::KIND, "failed");
            Some(e)
        }
    }
}

fn reset_backoff<K: ManagedResource>(ctx: &Reconciler<K>, namespace: &str, name: &str) {
    if let Ok(mut states) = ctx.backoff_states.lock() {
        if let Some(state) = states.get_mut(&resource_key(namespace, name)) {
            if state.error_count > 0 {
                info!(
                    error_count = state.error_count,
                    "Backoff reset after successful reconciliation"
                );
            }
            state.reset();
        }
    }
}

fn forget_backoff<K: ManagedResource>(ctx: &Reconciler<K>, namespace: &str, name: &str) {
    if let Ok(mut states) = ctx.backoff_states.lock() {
        states.remove(&resource_key(namespace, name));
    }
}
