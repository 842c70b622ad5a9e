//! Codec trait and the JSON implementation.
//!
//! Every message the relay exchanges with the server and the engine is a
//! UTF-8 JSON text frame, so the codec works on `String`/`&str` rather than
//! raw bytes. The envelope's `payload` is a second JSON document embedded
//! as a string; the same codec encodes and decodes both layers.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to text and decode text back.
///
/// `Send + Sync + 'static` so one instance can be shared by every
/// listener task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame body.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text frame body back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the text is malformed or doesn't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        text: &str,
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use sbox_protocol::{Codec, JsonCodec, RegistrationRequest};
///
/// let codec = JsonCodec;
/// let request = RegistrationRequest::new("42", "key", "bot@example.com");
///
/// let text = codec.encode(&request).unwrap();
/// let decoded: RegistrationRequest = codec.decode(&text).unwrap();
/// assert_eq!(request, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        text: &str,
    ) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JoinRoomPayload;

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<JoinRoomPayload, _> = JsonCodec.decode("not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_encode_produces_compact_json() {
        let text = JsonCodec.encode(&vec![1, 2, 3]).unwrap();
        assert_eq!(text, "[1,2,3]");
    }
}
