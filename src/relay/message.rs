// Message types and wire frames for the relay

use crate::relay::error::RelayError;
use crate::relay::identity::RoleClaim;
use crate::relay::policy::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Error text sent back for frames that cannot be decoded
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

/// A message as delivered to a recipient.
///
/// Only the sender's role is attributed, never its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: Role,
    pub message: Value,
    pub timestamp: u64,
}

/// Error notice sent to the originating connection only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
}

impl ErrorNotice {
    pub fn invalid_format() -> Self {
        Self {
            error: INVALID_MESSAGE_FORMAT.to_string(),
        }
    }
}

/// Frames written to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Delivery(Envelope),
    Error(ErrorNotice),
}

impl OutboundFrame {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame sent by a connected participant
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub message: Value,
}

impl InboundFrame {
    /// Parse a text frame; anything but an object with a `message` field is rejected
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(RelayError::Decode)
    }
}

/// One entry in a mission's persisted history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub sender_role: Role,
    pub message: Value,
    pub timestamp: u64,
}

/// Body of an out-of-band submission
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub mission_id: Option<String>,
    pub sender_role: Option<String>,
    pub message: Option<Value>,
}

impl SubmitRequest {
    /// Decode a request body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(bytes).map_err(|_| invalid_payload())
    }

    /// The role claim carried by the body
    pub fn claim(&self) -> RoleClaim {
        RoleClaim::new(self.sender_role.clone(), self.mission_id.clone())
    }

    /// Take the message, rejecting absent, null and empty-string payloads
    pub fn take_message(&mut self) -> Result<Value, RelayError> {
        match self.message.take() {
            None | Some(Value::Null) => Err(invalid_payload()),
            Some(Value::String(s)) if s.is_empty() => Err(invalid_payload()),
            Some(message) => Ok(message),
        }
    }
}

/// Acknowledgement for an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub status: String,
}

impl SubmitAck {
    pub fn sent() -> Self {
        Self {
            status: "sent".to_string(),
        }
    }
}

pub fn invalid_payload() -> RelayError {
    RelayError::Validation("Invalid payload".to_string())
}

/// Wall clock in epoch milliseconds that never runs backwards
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time, clamped to be no earlier than the previous reading
    pub fn now_millis(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        self.last = self.last.max(now);
        self.last
    }
}
