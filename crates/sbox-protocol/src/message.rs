//! Classification of inbound server and engine messages.

use std::fmt;

use serde_json::Value;

use crate::{Envelope, ProtocolError};

/// Envelope `type` tags the relay understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Server → relay: connect to an engine.
    JoinRoom,
    /// Relay → server: outcome of a join.
    JoinRoomResp,
    /// Server → relay: leave the current engine.
    LeaveRoom,
    /// Relay → server: the engine session has ended.
    LeaveRoomResp,
    /// Anything else; logged and ignored.
    Other(String),
}

impl MessageKind {
    /// Parses an envelope `type` tag. Matching is exact.
    pub fn from_type(tag: &str) -> Self {
        match tag {
            "join-room" => Self::JoinRoom,
            "join-room-resp" => Self::JoinRoomResp,
            "leave-room" => Self::LeaveRoom,
            "leave-room-resp" => Self::LeaveRoomResp,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::JoinRoom => "join-room",
            Self::JoinRoomResp => "join-room-resp",
            Self::LeaveRoom => "leave-room",
            Self::LeaveRoomResp => "leave-room-resp",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message received from the coordination server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Any object carrying a top-level `request` field. Only `"success"`
    /// (any case) counts as acceptance.
    RegistrationAck { accepted: bool },
    /// Everything else, with a `type` present.
    Envelope(Envelope),
}

impl ServerMessage {
    /// Classifies one text frame from the server.
    ///
    /// # Errors
    /// [`ProtocolError::Decode`] for malformed JSON or a non-envelope
    /// shape, [`ProtocolError::InvalidMessage`] for an envelope without a
    /// `type`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(ProtocolError::Decode)?;

        if let Some(request) = value.get("request") {
            return Ok(Self::RegistrationAck {
                accepted: is_success(request),
            });
        }

        let envelope: Envelope =
            serde_json::from_value(value).map_err(ProtocolError::Decode)?;
        if envelope.kind.is_none() {
            return Err(ProtocolError::InvalidMessage(
                "envelope has no type".into(),
            ));
        }
        Ok(Self::Envelope(envelope))
    }
}

/// Returns `true` if `text` is a registration ack accepting the relay.
///
/// Used for the engine handshake, where exactly one reply is read and
/// anything unexpected (bad JSON, missing field) counts as a rejection.
pub fn is_registration_accepted(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("request").map(is_success))
        .unwrap_or(false)
}

/// Extracts the room named in a `leave-room` envelope.
///
/// Returns `Ok(None)` when the envelope carries no body, in which case the
/// caller falls back to the active session.
///
/// # Errors
/// [`ProtocolError::Decode`] if the body is present but not JSON.
pub fn leave_room_target(
    envelope: &Envelope,
) -> Result<Option<String>, ProtocolError> {
    let Some(body) = envelope.payload_body() else {
        return Ok(None);
    };
    let value: Value =
        serde_json::from_str(body).map_err(ProtocolError::Decode)?;
    let room = value
        .get("RoomName")
        .or_else(|| value.get("roomName"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|room| !room.is_empty())
        .map(str::to_string);
    Ok(room)
}

fn is_success(request: &Value) -> bool {
    request
        .as_str()
        .is_some_and(|value| value.eq_ignore_ascii_case("success"))
}
