//! Wire codec collaborator: domain payloads to and from text.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Encoding or decoding failed.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(String),
    /// Text could not be decoded.
    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Converts structured payloads to a textual wire form and back.
pub trait WireCodec: Send + Sync {
    /// Encode a structured value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be represented.
    fn encode(&self, value: &Value) -> Result<String, CodecError>;

    /// Decode text into a structured value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] on malformed input.
    fn decode(&self, text: &str) -> Result<Value, CodecError>;
}

/// JSON text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Encode any serializable payload through a codec.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the payload cannot be serialized.
pub fn to_wire<T: Serialize>(codec: &dyn WireCodec, payload: &T) -> Result<String, CodecError> {
    let value = serde_json::to_value(payload).map_err(|e| CodecError::Encode(e.to_string()))?;
    codec.encode(&value)
}

/// Decode text into a typed payload through a codec.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] on malformed or mismatched input.
pub fn from_wire<T: DeserializeOwned>(codec: &dyn WireCodec, text: &str) -> Result<T, CodecError> {
    let value = codec.decode(text)?;
    serde_json::from_value(value).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceNotification;

    #[test]
    fn test_typed_payload_through_codec() {
        let n = DeviceNotification::new("d1", "temperature");
        let text = to_wire(&JsonCodec, &n).unwrap();
        let back: DeviceNotification = from_wire(&JsonCodec, &text).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = JsonCodec.decode("{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
