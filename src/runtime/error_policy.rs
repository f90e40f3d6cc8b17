//! # Error Policy
//!
//! Error handling and backoff logic for failed reconciliations.

use crate::controller::reconciler::{
    resource_key, BackoffState, ManagedResource, Reconciler, ReconcilerError, TriggerSource,
};
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback when the backoff table is unavailable
const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing object never delays
/// another. A successful pass resets it.
pub fn handle_reconciliation_error<K: ManagedResource>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler<K>>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::error_span!(
        "controller.watch.reconciliation_error",
        resource.kind = K::KIND,
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    observability::increment_reconciliation_errors(K::KIND);

    let (delay, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(resource_key(&namespace, &name))
                .or_insert_with(BackoffState::new);
            state.increment_error();
            (state.backoff.next_backoff(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (DEFAULT_ERROR_REQUEUE, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    info!(
        error_count,
        delay_secs = delay.as_secs_f64(),
        next_retry = %next_trigger_time.to_rfc3339(),
        "Retrying with Fibonacci backoff"
    );

    observability::increment_requeues_total(TriggerSource::ErrorBackoff.as_str());
    Action::requeue(delay)
}
