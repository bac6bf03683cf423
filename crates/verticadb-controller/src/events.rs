//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconcile that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::sync::Mutex;
use tracing::{debug, warn};
use verticadb_core::VerticaDB;

/// Action string recorded on every event
pub const ACTION_RECONCILE: &str = "Reconcile";

/// Trait for publishing Kubernetes Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event about `resource_ref`. Never fails.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

/// Helpers for the common case of an event about a VerticaDB
#[async_trait]
pub trait EventPublisherExt: EventPublisher {
    async fn normal(&self, vdb: &VerticaDB, reason: &str, note: String) {
        self.publish(&vdb.object_ref(&()), EventType::Normal, reason, note)
            .await
    }

    async fn warning(&self, vdb: &VerticaDB, reason: &str, note: String) {
        self.publish(&vdb.object_ref(&()), EventType::Warning, reason, note)
            .await
    }
}

impl<T: EventPublisher + ?Sized> EventPublisherExt for T {}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
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
impl EventPublisher for KubeEventPublisher {
    async fn publish(
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
            action: ACTION_RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// No-op implementation
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: String,
    ) {
    }
}

/// A published event as seen by `RecordingEventPublisher`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

/// Keeps every event in memory for assertions
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        debug!("Mock: event {} on {:?}: {}", reason, resource_ref.name, note);
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                object: resource_ref.name.clone().unwrap_or_default(),
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
                note,
            });
        }
    }
}
