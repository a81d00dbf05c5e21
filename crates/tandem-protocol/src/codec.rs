//! JSON codec for Tandem events.
//!
//! Events travel as WebSocket text frames; binary frames carrying the same
//! JSON are accepted on decode.

use thiserror::Error;

use crate::events::Event;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Structurally valid JSON that is not a usable event.
    #[error("Invalid event: {0}")]
    Invalid(String),
}

/// Encode an event to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &Event) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Decode an event from raw frame bytes.
///
/// # Errors
///
/// Returns an error if the data is not a JSON event envelope or has an
/// empty type tag.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
    let event: Event = serde_json::from_slice(data).map_err(ProtocolError::Decode)?;

    if event.kind.is_empty() {
        return Err(ProtocolError::Invalid("empty event type".to_string()));
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{tags, ChangeGroup};

    #[test]
    fn test_encode_decode() {
        let event = Event::new(
            tags::CHANGE_GROUP,
            &ChangeGroup {
                group: "music".into(),
            },
        )
        .unwrap();

        let encoded = encode(&event).unwrap();
        let decoded = decode(encoded.as_bytes()).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_decode_garbage() {
        match decode(b"not json") {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_type() {
        match decode(br#"{"payload":{}}"#) {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_type() {
        match decode(br#"{"type":"","payload":null}"#) {
            Err(ProtocolError::Invalid(_)) => {}
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_still_decodes() {
        // Routing, not decoding, rejects unknown tags.
        let event = decode(br#"{"type":"dance","payload":{"steps":3}}"#).unwrap();
        assert_eq!(event.kind, "dance");
    }
}
