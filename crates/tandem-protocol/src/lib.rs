//! # tandem-protocol
//!
//! Wire protocol definitions for the Tandem pairing relay.
//!
//! Every message exchanged with a client, in either direction, is an
//! [`Event`] envelope: a string tag plus an opaque JSON payload whose shape
//! depends on the tag.
//!
//! ## Event Types
//!
//! - `send_message` / `change_group` - Sent by clients
//! - `new_message` - Relayed chat message, delivered to the partner
//! - `partner_found` / `partner_left` - Pairing notifications
//!
//! ## Example
//!
//! ```rust
//! use tandem_protocol::{codec, ChangeGroup, Event, tags};
//!
//! let event = Event::new(tags::CHANGE_GROUP, &ChangeGroup { group: "rust".into() }).unwrap();
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(encoded.as_bytes()).unwrap();
//! let payload: ChangeGroup = decoded.decode().unwrap();
//! assert_eq!(payload.group, "rust");
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{tags, ChangeGroup, Event, NewMessage, SendMessage};
