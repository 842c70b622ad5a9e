//! Wire records exchanged with the coordination server and game engines.
//!
//! Every record here travels as a UTF-8 JSON text frame. The field names on
//! the wire follow the peers' conventions (`team_id`, `RoomName`, `Port#`),
//! not Rust's, so nearly every field carries a `#[serde(rename)]`. Reading
//! is lenient: camelCase spellings are accepted as aliases because the
//! peers are not consistent about casing.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de, de::DeserializeOwned};
use serde_json::Value;

use crate::{Codec, MessageKind, ProtocolError};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Credentials sent to the server and to every engine right after connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(rename = "team_id", alias = "teamId")]
    pub team_id: String,

    #[serde(rename = "api_key", alias = "apiKey")]
    pub api_key: String,

    #[serde(rename = "player_email_id", alias = "playerEmail")]
    pub player_email: String,
}

impl RegistrationRequest {
    /// Builds a registration request from configured credentials.
    pub fn new(
        team_id: impl Into<String>,
        api_key: impl Into<String>,
        player_email: impl Into<String>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            api_key: api_key.into(),
            player_email: player_email.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The outer shape of every server message other than the registration ack.
///
/// `payload` is *not* a nested object: it is a JSON document serialized to
/// a string, so it has to be decoded a second time with
/// [`decode_payload`](Self::decode_payload).
///
/// ```text
/// {"type":"join-room","respRequired":true,"payload":"{\"RoomName\":\"r1\",...}"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag, e.g. `join-room`.
    #[serde(rename = "type", alias = "Type", default)]
    pub kind: Option<String>,

    /// Whether the sender expects a reply.
    #[serde(
        rename = "respRequired",
        alias = "responseRequired",
        alias = "RespRequired",
        default
    )]
    pub resp_required: bool,

    /// The JSON-encoded payload string.
    #[serde(alias = "Payload", default)]
    pub payload: Option<String>,
}

impl Envelope {
    /// Wraps `payload` into an envelope of the given kind.
    ///
    /// Replies sent by the relay never ask for a response.
    pub fn wrap<T: Serialize>(
        codec: &impl Codec,
        kind: MessageKind,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: Some(kind.as_str().to_string()),
            resp_required: false,
            payload: Some(codec.encode(payload)?),
        })
    }

    /// Returns the parsed message kind, if the envelope has a type.
    pub fn message_kind(&self) -> Option<MessageKind> {
        self.kind.as_deref().map(MessageKind::from_type)
    }

    /// Returns the payload string unless it is missing, blank, or the
    /// literal `null`.
    pub fn payload_body(&self) -> Option<&str> {
        let body = self.payload.as_deref()?.trim();
        if body.is_empty() || body.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(body)
        }
    }

    /// Decodes the inner payload document.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] if there is no payload body,
    /// [`ProtocolError::Decode`] if the body doesn't parse as `T`.
    pub fn decode_payload<T: DeserializeOwned>(
        &self,
        codec: &impl Codec,
    ) -> Result<T, ProtocolError> {
        let body = self.payload_body().ok_or_else(|| {
            ProtocolError::InvalidMessage("payload missing".into())
        })?;
        codec.decode(body)
    }
}

// ---------------------------------------------------------------------------
// Payload records
// ---------------------------------------------------------------------------

/// Body of a `join-room` instruction: which engine to connect to.
///
/// Keys are matched case-insensitively when reading. The port is kept as
/// a plain integer so an out-of-range value still reaches the engine link
/// and is refused there, rather than failing the whole payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinRoomPayload {
    #[serde(rename = "RoomName")]
    pub room_name: String,

    #[serde(rename = "IP_Addr")]
    pub ip: String,

    /// The peers spell this key literally `Port#`.
    #[serde(rename = "Port#")]
    pub port: i32,

    #[serde(rename = "GameName")]
    pub game_name: String,
}

impl<'de> Deserialize<'de> for JoinRoomPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        let mut fields: HashMap<String, Value> = raw
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        Ok(Self {
            room_name: take_field(&mut fields, &["roomname"], "RoomName")?,
            ip: take_field(&mut fields, &["ip_addr", "ipaddr", "ip"], "IP_Addr")?,
            port: take_field(&mut fields, &["port#", "port"], "Port#")?,
            game_name: take_field(&mut fields, &["gamename"], "GameName")?,
        })
    }
}

/// Removes the first of `keys` present in `fields` and decodes it.
fn take_field<T, E>(
    fields: &mut HashMap<String, Value>,
    keys: &[&str],
    name: &'static str,
) -> Result<T, E>
where
    T: DeserializeOwned,
    E: de::Error,
{
    let value = keys
        .iter()
        .find_map(|key| fields.remove(*key))
        .ok_or_else(|| E::missing_field(name))?;
    serde_json::from_value(value).map_err(|e| E::custom(format!("{name}: {e}")))
}

impl JoinRoomPayload {
    /// The engine's `ip:port`, as shown in the session info.
    pub fn engine_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// WebSocket URL of the engine.
    pub fn engine_url(&self) -> String {
        format!("ws://{}", self.engine_address())
    }
}

/// Body of the `join-room-resp` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomResponsePayload {
    #[serde(rename = "RoomName", alias = "roomName")]
    pub room_name: String,

    #[serde(rename = "Joined", alias = "joined")]
    pub joined: bool,

    #[serde(rename = "Comment", alias = "comment")]
    pub comment: String,
}

/// Body of the `leave-room-resp` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRoomResponsePayload {
    #[serde(rename = "RoomName", alias = "roomName")]
    pub room_name: String,

    #[serde(rename = "Left", alias = "left")]
    pub left: bool,

    #[serde(rename = "Comment", alias = "comment")]
    pub comment: String,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The peers parse exact key names, so these tests pin the JSON shapes
    //! rather than round-tripping.

    use super::*;
    use crate::JsonCodec;

    #[test]
    fn test_registration_request_wire_keys() {
        let request = RegistrationRequest::new("7", "secret", "bot@team.io");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["team_id"], "7");
        assert_eq!(json["api_key"], "secret");
        assert_eq!(json["player_email_id"], "bot@team.io");
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_join_room_payload_reads_port_hash_key() {
        let json = r#"{"RoomName":"r1","IP_Addr":"10.0.0.5","Port#":9001,"GameName":"chess"}"#;
        let payload: JoinRoomPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.room_name, "r1");
        assert_eq!(payload.port, 9001);
        assert_eq!(payload.engine_address(), "10.0.0.5:9001");
        assert_eq!(payload.engine_url(), "ws://10.0.0.5:9001");
    }

    #[test]
    fn test_join_room_payload_accepts_camel_case() {
        let json = r#"{"roomName":"r2","ip":"127.0.0.1","port":4000,"gameName":"go"}"#;
        let payload: JoinRoomPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.engine_address(), "127.0.0.1:4000");
        assert_eq!(payload.game_name, "go");
    }

    #[test]
    fn test_join_room_payload_rejects_missing_port() {
        let json = r#"{"RoomName":"r1","IP_Addr":"10.0.0.5","GameName":"chess"}"#;
        assert!(serde_json::from_str::<JoinRoomPayload>(json).is_err());
    }

    #[test]
    fn test_join_room_payload_keys_ignore_case() {
        let json = r#"{"roomname":"r3","ip_addr":"10.1.1.1","PORT#":7000,"GAMENAME":"go"}"#;
        let payload: JoinRoomPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.room_name, "r3");
        assert_eq!(payload.engine_address(), "10.1.1.1:7000");
        assert_eq!(payload.game_name, "go");
    }

    #[test]
    fn test_join_room_payload_keeps_out_of_range_port() {
        let json = r#"{"RoomName":"r4","IP_Addr":"127.0.0.1","Port#":70000,"GameName":"go"}"#;
        let payload: JoinRoomPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.port, 70000);
        assert_eq!(payload.engine_url(), "ws://127.0.0.1:70000");
    }

    #[test]
    fn test_envelope_payload_is_double_encoded() {
        let reply = JoinRoomResponsePayload {
            room_name: "r1".into(),
            joined: true,
            comment: String::new(),
        };
        let envelope =
            Envelope::wrap(&JsonCodec, MessageKind::JoinRoomResp, &reply)
                .unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "join-room-resp");
        assert_eq!(json["respRequired"], false);
        // The payload is a string containing JSON, not an object.
        let inner = json["payload"].as_str().expect("payload is a string");
        let inner: serde_json::Value = serde_json::from_str(inner).unwrap();
        assert_eq!(inner["RoomName"], "r1");
        assert_eq!(inner["Joined"], true);
        assert_eq!(inner["Comment"], "");
    }

    #[test]
    fn test_leave_response_wire_keys() {
        let reply = LeaveRoomResponsePayload {
            room_name: "r9".into(),
            left: true,
            comment: "Server requested leave".into(),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["RoomName"], "r9");
        assert_eq!(json["Left"], true);
        assert_eq!(json["Comment"], "Server requested leave");
    }

    #[test]
    fn test_envelope_defaults_when_fields_missing() {
        let envelope: Envelope = serde_json::from_str("{}").unwrap();
        assert_eq!(envelope.kind, None);
        assert!(!envelope.resp_required);
        assert_eq!(envelope.payload, None);
    }

    #[test]
    fn test_payload_body_treats_blank_and_null_as_missing() {
        let mut envelope = Envelope {
            kind: Some("leave-room".into()),
            resp_required: false,
            payload: Some("   ".into()),
        };
        assert_eq!(envelope.payload_body(), None);

        envelope.payload = Some("NULL".into());
        assert_eq!(envelope.payload_body(), None);

        envelope.payload = Some(" {\"RoomName\":\"r\"} ".into());
        assert_eq!(envelope.payload_body(), Some("{\"RoomName\":\"r\"}"));
    }

    #[test]
    fn test_decode_payload_without_body_is_invalid_message() {
        let envelope = Envelope {
            kind: Some("join-room".into()),
            resp_required: true,
            payload: None,
        };
        let result: Result<JoinRoomPayload, _> =
            envelope.decode_payload(&JsonCodec);
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_decode_payload_with_garbage_is_decode_error() {
        let envelope = Envelope {
            kind: Some("join-room".into()),
            resp_required: true,
            payload: Some("{not json".into()),
        };
        let result: Result<JoinRoomPayload, _> =
            envelope.decode_payload(&JsonCodec);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
