//! Event routing for Tandem.
//!
//! The router maps event type tags to handler functions. It is populated
//! before the matchmaker starts and read-only afterwards.

use crate::matchmaker::{MatchError, Matchmaker};
use crate::session::Session;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tandem_protocol::{tags, ChangeGroup, Event, SendMessage};
use tracing::trace;

/// A handler for one event type.
pub type EventHandler = fn(&Matchmaker, &Event, &Arc<Session>) -> Result<(), MatchError>;

/// Event type -> handler registry.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: HashMap<&'static str, EventHandler>,
}

impl EventRouter {
    /// Create a router with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router with the `send_message` and `change_group` handlers.
    #[must_use]
    pub fn with_default_handlers() -> Self {
        let mut router = Self::new();
        router.register(tags::SEND_MESSAGE, send_message);
        router.register(tags::CHANGE_GROUP, change_group);
        router
    }

    /// Register a handler, returning the one it replaces.
    pub fn register(&mut self, kind: &'static str, handler: EventHandler) -> Option<EventHandler> {
        self.handlers.insert(kind, handler)
    }

    /// Check if a handler is registered for an event type.
    #[must_use]
    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Dispatch an event to its handler.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::NoHandler`] if no handler is registered for the
    /// event type, otherwise whatever the handler returns.
    pub fn route(
        &self,
        matchmaker: &Matchmaker,
        event: &Event,
        session: &Arc<Session>,
    ) -> Result<(), MatchError> {
        let handler = self
            .handlers
            .get(event.kind.as_str())
            .ok_or_else(|| MatchError::NoHandler(event.kind.clone()))?;

        trace!(session = %session.id(), event = %event.kind, "Routing event");
        handler(matchmaker, event, session)
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("EventRouter").field("handlers", &kinds).finish()
    }
}

/// Relay a chat message to the sender's partner.
///
/// # Errors
///
/// Fails on a malformed payload or when the sender has no partner.
pub fn send_message(
    matchmaker: &Matchmaker,
    event: &Event,
    session: &Arc<Session>,
) -> Result<(), MatchError> {
    let payload: SendMessage = event.decode()?;
    matchmaker.send_message(session, payload)
}

/// Move the sender to another group and pair it there.
///
/// # Errors
///
/// Fails on a malformed payload or an invalid target group.
pub fn change_group(
    matchmaker: &Matchmaker,
    event: &Event,
    session: &Arc<Session>,
) -> Result<(), MatchError> {
    let payload: ChangeGroup = event.decode()?;
    matchmaker.change_group(session, &payload.group)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaker::MatchmakerConfig;
    use serde_json::json;

    #[test]
    fn test_default_handlers() {
        let router = EventRouter::with_default_handlers();
        assert!(router.has_handler(tags::SEND_MESSAGE));
        assert!(router.has_handler(tags::CHANGE_GROUP));
        assert!(!router.has_handler(tags::NEW_MESSAGE));
    }

    #[test]
    fn test_unknown_event() {
        let mm = Matchmaker::new();
        let (session, _rx) = Session::new("lobby");
        mm.attach(&session).unwrap();

        let result = mm.route_event(&Event::empty("dance"), &session);
        assert!(matches!(result, Err(MatchError::NoHandler(kind)) if kind == "dance"));
    }

    #[test]
    fn test_handled_event_reports_success() {
        let mm = Matchmaker::new();
        let (a, _rx_a) = Session::new("lobby");
        let (b, mut rx_b) = Session::new("lobby");
        mm.attach(&a).unwrap();
        mm.attach(&b).unwrap();
        while rx_b.try_recv().is_ok() {}

        let event = Event::new(
            tags::SEND_MESSAGE,
            &json!({"message": "ping", "from": "a"}),
        )
        .unwrap();
        mm.route_event(&event, &a).unwrap();

        let relayed = rx_b.try_recv().unwrap();
        assert!(relayed.is(tags::NEW_MESSAGE));
    }

    #[test]
    fn test_malformed_payload() {
        let mm = Matchmaker::new();
        let (session, _rx) = Session::new("lobby");
        mm.attach(&session).unwrap();

        let event = Event::new(tags::SEND_MESSAGE, &json!({"text": 42})).unwrap();
        assert!(matches!(
            mm.route_event(&event, &session),
            Err(MatchError::MalformedPayload(_))
        ));

        let event = Event::empty(tags::CHANGE_GROUP);
        assert!(matches!(
            mm.route_event(&event, &session),
            Err(MatchError::MalformedPayload(_))
        ));
        assert_eq!(session.group(), "lobby");
    }

    #[test]
    fn test_custom_handler() {
        fn reject(_: &Matchmaker, _: &Event, _: &Arc<Session>) -> Result<(), MatchError> {
            Err(MatchError::NoPartner)
        }

        let mut router = EventRouter::with_default_handlers();
        assert!(router.register("typing", reject).is_none());

        let mm = Matchmaker::with_router(MatchmakerConfig::default(), router);
        let (session, _rx) = Session::new("lobby");

        assert!(matches!(
            mm.route_event(&Event::empty("typing"), &session),
            Err(MatchError::NoPartner)
        ));
    }
}
