//! Event envelope and payload types.
//!
//! The envelope is `{ "type": <tag>, "payload": <object> }`. The payload is
//! kept as an untyped JSON value until a handler decodes it into one of the
//! payload structs below.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::codec::ProtocolError;

/// Event type tags.
pub mod tags {
    /// Client -> server: relay a chat message to the partner.
    pub const SEND_MESSAGE: &str = "send_message";
    /// Client -> server: move to another group and re-pair.
    pub const CHANGE_GROUP: &str = "change_group";
    /// Server -> client: a message from the partner.
    pub const NEW_MESSAGE: &str = "new_message";
    /// Server -> client: a partner has been assigned.
    pub const PARTNER_FOUND: &str = "partner_found";
    /// Server -> client: the partner moved to another group.
    pub const PARTNER_LEFT: &str = "partner_left";
}

/// A typed envelope carried over the wire and between handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type tag, see [`tags`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Tag-specific payload. Absent payloads decode as `null`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event with an encoded payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn new<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: kind.into(),
            payload: serde_json::to_value(payload).map_err(ProtocolError::Encode)?,
        })
    }

    /// Create an event without a payload.
    #[must_use]
    pub fn empty(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Create a `partner_found` notification.
    #[must_use]
    pub fn partner_found() -> Self {
        Self::empty(tags::PARTNER_FOUND)
    }

    /// Create a `partner_left` notification.
    #[must_use]
    pub fn partner_left() -> Self {
        Self::empty(tags::PARTNER_LEFT)
    }

    /// Create a `new_message` event.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn new_message(message: &NewMessage) -> Result<Self, ProtocolError> {
        Self::new(tags::NEW_MESSAGE, message)
    }

    /// Decode the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.payload).map_err(ProtocolError::Decode)
    }

    /// Check the event tag.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Payload of `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Message body.
    pub message: String,
    /// Sender display identity, chosen by the client.
    pub from: String,
}

/// Payload of `change_group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeGroup {
    /// Target group name.
    pub group: String,
}

/// Payload of `new_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Message body.
    pub message: String,
    /// Sender display identity.
    pub from: String,
    /// When the relay accepted the message.
    #[serde(with = "time::serde::rfc3339")]
    pub sent: OffsetDateTime,
}

impl NewMessage {
    /// Stamp an inbound message with the current time.
    #[must_use]
    pub fn stamped(message: SendMessage) -> Self {
        Self {
            message: message.message,
            from: message.from,
            sent: OffsetDateTime::now_utc(),
        }
    }
}
