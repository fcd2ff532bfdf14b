//! User-visible events

use crate::store::Resource;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Mutex;

pub const REASON_CREATED: &str = "Created";
pub const REASON_UPDATED: &str = "Updated";
pub const REASON_DELETED: &str = "Deleted";
pub const REASON_FAILED_CREATE: &str = "FailedCreate";
pub const REASON_FAILED_UPDATE: &str = "FailedUpdate";
pub const REASON_FAILED_DELETE: &str = "FailedDelete";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// The object an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl ObjectReference {
    pub fn of<R: Resource>(object: &R) -> Self {
        let meta = object.meta();
        Self {
            kind: R::KIND,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub object: ObjectReference,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub trait EventRecorder: Send + Sync {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str);

    fn normal(&self, object: &ObjectReference, reason: &str, message: &str) {
        self.event(object, EventType::Normal, reason, message);
    }

    fn warning(&self, object: &ObjectReference, reason: &str, message: &str) {
        self.event(object, EventType::Warning, reason, message);
    }
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => tracing::info!("{}: {}: {}", object, reason, message),
            EventType::Warning => tracing::warn!("{}: {}: {}", object, reason, message),
        }
    }
}

/// Keeps events in memory and logs them.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn warnings(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == EventType::Warning)
            .collect()
    }

    pub fn count(&self, reason: &str) -> usize {
        self.events().iter().filter(|e| e.reason == reason).count()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl EventRecorder for MemoryRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        TracingRecorder.event(object, event_type, reason, message);
        let event = Event {
            object: object.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Machine;

    #[test]
    fn test_memory_recorder() {
        let recorder = MemoryRecorder::new();
        let machine = Machine::new("ns", "worker-0");
        let object = ObjectReference::of(&machine);
        assert_eq!(object.to_string(), "Machine ns/worker-0");

        recorder.normal(&object, REASON_CREATED, "Created Machine worker-0");
        recorder.warning(&object, REASON_FAILED_UPDATE, "boom");

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.warnings().len(), 1);
        assert_eq!(recorder.count(REASON_FAILED_UPDATE), 1);

        recorder.clear();
        assert!(recorder.events().is_empty());
    }
}
