//! Process-wide publish/subscribe hub
//!
//! Job queues announce drained batches through the [`EventManager`]; the
//! archiver and any other interested component subscribe with an
//! [`EventReceiver`].
//!
//! # Event Types
//!
//! - `JOBQUEUE_FINISHED` - a queue ran out of jobs, payload `{index, modified}`
//! - anything else travels as [`Event::Custom`] with a JSON payload
//!
//! # Re-entrancy
//!
//! `fire_event` copies the receiver list and releases the lock before
//! calling anyone, so a receiver may register receivers or fire further
//! events from its callback or from threads it spawns.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Type tag of the queue-drained event
pub const JOBQUEUE_FINISHED: &str = "JOBQUEUE_FINISHED";

const INDEX_PREFIX: &str = "index.";

/// Payload of `JOBQUEUE_FINISHED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobQueueMetadata {
    /// Index name, without any `index.` prefix
    pub index: String,
    /// Whether any job of the batch modified the index
    pub modified: bool,
}

impl JobQueueMetadata {
    pub fn new(index: &str, modified: bool) -> Self {
        Self {
            index: normalize_index_name(index).to_string(),
            modified,
        }
    }

    /// OR another job's modified flag into the batch
    pub fn merge_modified(&mut self, modified: bool) {
        self.modified |= modified;
    }
}

/// Strip a leading `index.` from configuration-style names
pub fn normalize_index_name(name: &str) -> &str {
    name.strip_prefix(INDEX_PREFIX).unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    JobQueueFinished(JobQueueMetadata),
    Custom {
        event_type: String,
        payload: serde_json::Value,
    },
}

/// Wrapper for events with type field
#[derive(Serialize)]
struct EventWrapper<'a, P: Serialize> {
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    payload: &'a P,
}

impl Event {
    pub fn custom(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Event::Custom {
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Event::JobQueueFinished(_) => JOBQUEUE_FINISHED,
            Event::Custom { event_type, .. } => event_type,
        }
    }

    /// Single-line JSON form, `{"type": ..., <payload fields>}`
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Event::JobQueueFinished(meta) => serde_json::to_string(&EventWrapper {
                event_type: JOBQUEUE_FINISHED,
                payload: meta,
            }),
            Event::Custom {
                event_type,
                payload: serde_json::Value::Object(fields),
            } => serde_json::to_string(&EventWrapper {
                event_type: event_type.as_str(),
                payload: fields,
            }),
            Event::Custom {
                event_type,
                payload,
            } => serde_json::to_string(&serde_json::json!({
                "type": event_type,
                "payload": payload,
            })),
        }
    }
}

/// Something that wants to hear about events
pub trait EventReceiver: Send + Sync {
    fn process_event(&self, event: &Event);

    /// Filter by event type before `process_event` is called
    fn accepts(&self, _event_type: &str) -> bool {
        true
    }

    /// Wait for work started from `process_event` on other threads
    fn shutdown(&self) {}
}

/// Receiver list shared by every queue of the process
#[derive(Default)]
pub struct EventManager {
    receivers: RwLock<Vec<Arc<dyn EventReceiver>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receivers are never removed
    pub fn register(&self, receiver: Arc<dyn EventReceiver>) {
        self.receivers.write().push(receiver);
    }

    /// Deliver `event` to every interested receiver, on the calling thread.
    /// Returns how many receivers were called.
    pub fn fire_event(&self, event: &Event) -> usize {
        let receivers: Vec<Arc<dyn EventReceiver>> = self.receivers.read().clone();

        let event_type = event.event_type();
        let mut delivered = 0;
        for receiver in receivers.iter().filter(|r| r.accepts(event_type)) {
            receiver.process_event(event);
            delivered += 1;
        }
        tracing::debug!("Fired {} to {} receiver(s)", event_type, delivered);
        delivered
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.read().len()
    }

    /// Let every receiver finish its outstanding work
    pub fn shutdown(&self) {
        let receivers: Vec<Arc<dyn EventReceiver>> = self.receivers.read().clone();
        for receiver in &receivers {
            receiver.shutdown();
        }
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}
