//! DXLink JSON Codec
//!
//! Every DXLink frame is a single JSON object with a `type` discriminator.
//! Decoding goes through an untyped value first so a malformed frame of a
//! known type can be reported with its type name.

use super::messages::{InboundMessage, OutboundMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object with a string `type`.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// Frame of a known type is missing or mistyping fields.
    #[error("malformed {message_type} frame: {source}")]
    Malformed {
        /// Declared message type.
        message_type: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// JSON codec for the DXLink protocol.
#[derive(Debug, Default, Clone)]
pub struct DxLinkCodec;

impl DxLinkCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON, not an object with a
    /// `type`, or a known type with invalid fields.
    pub fn decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(trimmed)
            )));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let message_type = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CodecError::InvalidFormat("missing `type` field".to_string()))?
            .to_string();

        serde_json::from_value(value).map_err(|source| CodecError::Malformed {
            message_type,
            source,
        })
    }

    /// Encode an outbound message as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &OutboundMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::dxlink::messages::AuthStateKind;

    #[test]
    fn decode_auth_state() {
        let codec = DxLinkCodec::new();
        let message = codec
            .decode(r#"{"type":"AUTH_STATE","channel":0,"state":"UNAUTHORIZED"}"#)
            .unwrap();
        assert!(matches!(
            message,
            InboundMessage::AuthState {
                state: AuthStateKind::Unauthorized,
                ..
            }
        ));
    }

    #[test]
    fn decode_feed_data() {
        let codec = DxLinkCodec::new();
        let message = codec
            .decode(r#"{"type":"FEED_DATA","channel":3,"data":["Trade",["Trade","SPY",1.0,2,3]]}"#)
            .unwrap();
        let InboundMessage::FeedData { channel, data } = message else {
            panic!("expected FEED_DATA");
        };
        assert_eq!(channel, 3);
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn decode_rejects_array_frame() {
        let codec = DxLinkCodec::new();
        assert!(matches!(
            codec.decode("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn decode_rejects_missing_type() {
        let codec = DxLinkCodec::new();
        assert!(matches!(
            codec.decode(r#"{"channel":0}"#),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn decode_reports_malformed_known_type() {
        let codec = DxLinkCodec::new();
        let err = codec
            .decode(r#"{"type":"CHANNEL_OPENED","channel":"three"}"#)
            .unwrap_err();
        match err {
            CodecError::Malformed { message_type, .. } => {
                assert_eq!(message_type, "CHANNEL_OPENED");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_invalid_json() {
        let codec = DxLinkCodec::new();
        assert!(matches!(codec.decode("{not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn encode_keepalive() {
        let codec = DxLinkCodec::new();
        let text = codec.encode(&OutboundMessage::keepalive()).unwrap();
        assert_eq!(text, r#"{"type":"KEEPALIVE","channel":0}"#);
    }
}
