//! Events received on the stream.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Liveness signal; never dispatched and never moves the cursor.
pub const KEEP_ALIVE_EVENT: &str = "keepalive";
/// Server-initiated sign-out.
pub const FORCE_LOGOUT_EVENT: &str = "force_logout";

/// One frame as delivered by a [`crate::transport::Transport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event {
        name: String,
        data: String,
        id: Option<String>,
    },
    /// SSE comment line, used by servers as a keep-alive.
    Comment,
}

impl Frame {
    pub fn is_keep_alive(&self) -> bool {
        match self {
            Frame::Comment => true,
            Frame::Event { name, .. } => name == KEEP_ALIVE_EVENT,
        }
    }
}

/// A named event with its JSON payload and the server timestamp it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub name: String,
    pub payload: Value,
    pub id: Option<String>,
    /// Seconds since the epoch.
    pub ts: f64,
}

impl StreamEvent {
    /// Build an event from a raw frame. Non-JSON data is kept as a string
    /// payload. The timestamp comes from the payload's `ts` or `timestamp`,
    /// then a numeric event id, then the local clock.
    pub fn from_frame(name: String, data: &str, id: Option<String>) -> Self {
        let payload =
            serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()));
        let ts = payload_timestamp(&payload)
            .or_else(|| id.as_deref().and_then(|id| id.trim().parse::<f64>().ok()))
            .filter(|ts| ts.is_finite())
            .unwrap_or_else(now_seconds);

        Self {
            name,
            payload,
            id,
            ts,
        }
    }

    /// Deserialize the payload into a typed event body.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Body of a `force_logout` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForceLogout {
    #[serde(default)]
    pub reason: Option<String>,
}

fn payload_timestamp(payload: &Value) -> Option<f64> {
    ["ts", "timestamp"]
        .iter()
        .filter_map(|key| payload.get(key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
