use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Wire format for named events crossing the bridge, in either direction.
///
/// The event name is free-form: the gateway forwards whatever names the
/// client and the upstream invent, with the payload untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// One live realtime client connection, reduced to its event channels.
///
/// The WebSocket handler adapts the raw socket into this pair; tests drive
/// the channels directly. Dropping `to_client`'s receiving half or closing
/// `from_client`'s sending half models a client disconnect.
pub struct ClientSession {
    /// Locally unique connection identifier, for log correlation
    pub id: Uuid,
    /// Events arriving from the mobile client
    pub from_client: mpsc::Receiver<EventMessage>,
    /// Events to deliver to the mobile client
    pub to_client: mpsc::Sender<EventMessage>,
}

impl ClientSession {
    pub fn new(
        from_client: mpsc::Receiver<EventMessage>,
        to_client: mpsc::Sender<EventMessage>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_client,
            to_client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_message_roundtrip() {
        let ev = EventMessage::new("task:updated", json!({"x": 1}));
        let text = serde_json::to_string(&ev).unwrap();
        let parsed: EventMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, ev);
    }

    #[test]
    fn test_event_message_payload_defaults_to_null() {
        let parsed: EventMessage = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(parsed.event, "ping");
        assert_eq!(parsed.payload, Value::Null);
    }
}
