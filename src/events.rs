//! # Events
//!
//! Kubernetes Event recording for the Bucket and Asset handlers.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use std::sync::Mutex;
use tracing::warn;

/// Publishes Kubernetes Events about a resource
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Publish one event
    ///
    /// * `reason` - machine-readable reason (e.g. `BucketPolicyUpdated`)
    /// * `note` - rendered human-readable message
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

/// Production recorder wrapping `kube_runtime::events::Recorder`
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    /// The controller name appears as the reporting component on Events
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards every event
#[derive(Debug, Default)]
pub struct NoopEventRecorder;

#[async_trait]
impl EventRecorder for NoopEventRecorder {
    async fn record(&self, _: &ObjectReference, _: EventType, _: &str, _: String) {}
}

/// An event captured by [`MemoryEventRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

/// Keeps every event in memory so tests can assert on them
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Reasons in recording order
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let event = RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
