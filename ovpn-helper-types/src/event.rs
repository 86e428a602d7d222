use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four-field event record fanned out to SSE subscribers.
///
/// `data` is deliberately untyped JSON: events carry heterogeneous payloads
/// (a profile snapshot for `update`, a line of text for `output`, nothing
/// for `wakeup`) and the control API forwards them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
}

impl Event {
    /// Constructs an event with a fresh id, matching the `Event.Init()`
    /// assignment-on-publish behavior: events are immutable once built.
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Event {
            id: Uuid::new_v4(),
            event_type,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Update,
    Connected,
    Disconnected,
    Output,
    Inactive,
    AuthError,
    TimeoutError,
    Wakeup,
}

/// Payload of an `output` event: one verbatim line from the OpenVPN child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputData {
    pub id: String,
    pub output: String,
}
