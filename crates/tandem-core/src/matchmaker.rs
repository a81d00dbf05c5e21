//! The process-wide pairing coordinator.
//!
//! The matchmaker owns the group registry, the symmetric pair registry and
//! the event router. Sessions reach it through a shared `Arc<Matchmaker>`.

use crate::group::{validate_group_name, Group, GroupState};
use crate::router::EventRouter;
use crate::session::{GroupName, Session, SessionId, SessionStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tandem_protocol::{Event, NewMessage, ProtocolError, SendMessage};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Matchmaking errors.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Invalid group name.
    #[error("Invalid group name: {0}")]
    InvalidGroup(&'static str),

    /// Maximum number of groups reached.
    #[error("Maximum groups reached")]
    GroupLimitReached,

    /// No handler for the event type.
    #[error("No handler registered for event type: {0}")]
    NoHandler(String),

    /// Payload could not be decoded or encoded.
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] ProtocolError),

    /// The session is not paired.
    #[error("Session has no partner")]
    NoPartner,

    /// The session's connection is gone.
    #[error("Session {0} is no longer connected")]
    Disconnected(SessionId),
}

/// Matchmaker configuration.
#[derive(Debug, Clone)]
pub struct MatchmakerConfig {
    /// Maximum number of groups.
    pub max_groups: usize,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        Self { max_groups: 10_000 }
    }
}

/// Outcome of a pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    /// Queued until another session arrives.
    Waiting,
    /// Paired with the given session.
    Paired(SessionId),
}

/// The pairing coordinator.
pub struct Matchmaker {
    /// Groups indexed by name, created on first reference.
    groups: DashMap<GroupName, Arc<Group>>,
    /// Number of groups created. Groups are never dropped.
    group_count: AtomicUsize,
    /// Symmetric pair registry: `pairs[a] = b` iff `pairs[b] = a`.
    pairs: Mutex<HashMap<SessionId, Arc<Session>>>,
    /// Event handlers.
    router: EventRouter,
    /// Configuration.
    config: MatchmakerConfig,
}

impl Matchmaker {
    /// Create a matchmaker with default configuration and handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MatchmakerConfig::default())
    }

    /// Create a matchmaker with custom configuration and the default handlers.
    #[must_use]
    pub fn with_config(config: MatchmakerConfig) -> Self {
        Self::with_router(config, EventRouter::with_default_handlers())
    }

    /// Create a matchmaker with a custom handler registry.
    #[must_use]
    pub fn with_router(config: MatchmakerConfig, router: EventRouter) -> Self {
        info!("Creating matchmaker with config: {:?}", config);
        Self {
            groups: DashMap::new(),
            group_count: AtomicUsize::new(0),
            pairs: Mutex::new(HashMap::new()),
            router,
            config,
        }
    }

    /// Get matchmaker statistics.
    #[must_use]
    pub fn stats(&self) -> MatchmakerStats {
        let groups: Vec<Arc<Group>> = self.groups.iter().map(|e| Arc::clone(e.value())).collect();
        MatchmakerStats {
            group_count: groups.len(),
            member_count: groups.iter().map(|g| g.member_count()).sum(),
            waiting_count: groups.iter().map(|g| g.waiting_count()).sum(),
            pair_count: self.lock_pairs().len() / 2,
        }
    }

    /// Get a group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.get(name).map(|g| Arc::clone(g.value()))
    }

    /// Get the partner of a session from the pair registry.
    #[must_use]
    pub fn partner_of(&self, id: SessionId) -> Option<SessionId> {
        self.lock_pairs().get(&id).map(|p| p.id())
    }

    /// Attach a new session to its group and try to pair it.
    ///
    /// # Errors
    ///
    /// Returns an error if the group name is invalid or the group limit is
    /// reached.
    pub fn attach(&self, session: &Arc<Session>) -> Result<Pairing, MatchError> {
        let group = self.get_or_create_group(&session.group())?;

        let mut state = group.lock();
        state.join(session);
        debug!(group = %group.name(), session = %session.id(), "Session attached");
        self.match_or_enqueue(&group, &mut state, session)
    }

    /// Pair a session with the longest-waiting session of its group, or
    /// queue it if nobody is waiting.
    ///
    /// Both sessions of a new pair receive a `partner_found` event.
    ///
    /// # Errors
    ///
    /// Returns an error if the session's group cannot be created, or
    /// [`MatchError::Disconnected`] if the session is already closed.
    pub fn pair_client(&self, session: &Arc<Session>) -> Result<Pairing, MatchError> {
        let group = self.get_or_create_group(&session.group())?;
        let mut state = group.lock();
        self.match_or_enqueue(&group, &mut state, session)
    }

    /// Move a session to another group and pair it there.
    ///
    /// An existing pair is dissolved: the former partner receives a
    /// `partner_left` event and is queued again in its own group.
    ///
    /// # Errors
    ///
    /// Returns an error if the target group name is invalid or the group
    /// limit is reached. The session is left untouched in that case.
    pub fn change_group(&self, session: &Arc<Session>, target: &str) -> Result<Pairing, MatchError> {
        let target_group = self.get_or_create_group(target)?;
        let current = session.group();

        if let Some(partner) = self.detach(session, &current) {
            info!(
                session = %session.id(),
                partner = %partner.id(),
                "Pair dissolved by group change"
            );
            self.release_partner(&partner);
        }

        session.set_group(target);
        session.set_status(SessionStatus::Idle);
        debug!(session = %session.id(), from = %current, to = %target, "Changing group");

        let mut state = target_group.lock();
        if session.is_closed() {
            return Err(MatchError::Disconnected(session.id()));
        }
        state.join(session);
        self.match_or_enqueue(&target_group, &mut state, session)
    }

    /// Take a session out of `group` and dissolve its pair, returning the
    /// former partner. Runs under the group lock.
    fn detach(&self, session: &Session, group: &str) -> Option<Arc<Session>> {
        match self.group(group) {
            Some(old) => {
                let mut state = old.lock();
                state.leave(session.id());
                self.unpair(session.id())
            }
            None => self.unpair(session.id()),
        }
    }

    /// Notify an abandoned partner and queue it again in its group.
    ///
    /// Skipped when the partner has meanwhile left that group, been paired
    /// again or closed: whoever moved it owns its state now.
    fn release_partner(&self, partner: &Arc<Session>) {
        let name = partner.group();
        let Some(group) = self.group(&name) else {
            return;
        };

        let mut state = group.lock();
        let settled = partner.is_closed()
            || partner.group() != name
            || !state.contains(partner.id())
            || self.lock_pairs().contains_key(&partner.id());
        if settled {
            debug!(partner = %partner.id(), "Former partner already moved on");
            return;
        }

        partner.set_status(SessionStatus::Idle);
        if let Err(e) = partner.send(Event::partner_left()) {
            debug!(partner = %partner.id(), error = %e, "Could not notify former partner");
        }
        if let Err(e) = self.match_or_enqueue(&group, &mut state, partner) {
            debug!(partner = %partner.id(), error = %e, "Could not re-queue former partner");
        }
    }

    /// Relay a chat message from a session to its partner.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::NoPartner`] if the session is not paired, or an
    /// error if the outbound event cannot be built or delivered.
    pub fn send_message(&self, session: &Session, message: SendMessage) -> Result<(), MatchError> {
        let partner = self
            .lock_pairs()
            .get(&session.id())
            .cloned()
            .ok_or(MatchError::NoPartner)?;

        let event = Event::new_message(&NewMessage::stamped(message))?;
        partner.send(event)?;

        debug!(from = %session.id(), to = %partner.id(), "Relayed message");
        Ok(())
    }

    /// Route an inbound event through the handler registry.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::NoHandler`] for unknown event types, or the
    /// handler's error.
    pub fn route_event(&self, event: &Event, session: &Arc<Session>) -> Result<(), MatchError> {
        self.router.route(self, event, session)
    }

    /// Tear down a session. Idempotent.
    ///
    /// The session leaves its group and queue; if it was paired, the pair is
    /// removed and the partner is closed as well.
    pub fn remove_client(&self, session: &Session) {
        let first = session.mark_closed();

        if let Some(group) = self.group(&session.group()) {
            group.leave(session.id());
        }

        if let Some(partner) = self.unpair(session.id()) {
            info!(
                session = %session.id(),
                partner = %partner.id(),
                "Closing partner of departing session"
            );
            partner.mark_closed();
        }

        if first {
            debug!(session = %session.id(), "Session removed");
        }
    }

    fn get_or_create_group(&self, name: &str) -> Result<Arc<Group>, MatchError> {
        if let Some(group) = self.group(name) {
            return Ok(group);
        }

        validate_group_name(name).map_err(MatchError::InvalidGroup)?;

        // Counted under the entry's shard lock; `groups.len()` would need
        // every shard and can deadlock here.
        let group = match self.groups.entry(name.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let created = self.group_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.config.max_groups).then_some(n + 1)
                });
                if created.is_err() {
                    warn!(group = %name, "Group limit reached");
                    return Err(MatchError::GroupLimitReached);
                }
                debug!(group = %name, "Creating new group");
                Arc::clone(entry.insert(Arc::new(Group::new(name))).value())
            }
        };
        Ok(group)
    }

    /// The pairing decision. Runs with the group lock held and takes the
    /// pair registry lock inside it.
    fn match_or_enqueue(
        &self,
        group: &Group,
        state: &mut GroupState,
        session: &Arc<Session>,
    ) -> Result<Pairing, MatchError> {
        if session.is_closed() {
            return Err(MatchError::Disconnected(session.id()));
        }

        let mut pairs = self.lock_pairs();
        if let Some(partner) = pairs.get(&session.id()) {
            return Ok(Pairing::Paired(partner.id()));
        }

        let Some(partner) = state.next_waiting(session.id()) else {
            drop(pairs);
            state.enqueue(session);
            session.set_status(SessionStatus::Waiting {
                group: group.name().to_string(),
            });
            debug!(group = %group.name(), session = %session.id(), "Waiting for partner");
            return Ok(Pairing::Waiting);
        };

        pairs.insert(partner.id(), Arc::clone(session));
        pairs.insert(session.id(), Arc::clone(&partner));
        drop(pairs);

        partner.set_status(SessionStatus::Paired {
            partner: session.id(),
        });
        session.set_status(SessionStatus::Paired {
            partner: partner.id(),
        });

        for side in [&partner, session] {
            if let Err(e) = side.send(Event::partner_found()) {
                debug!(session = %side.id(), error = %e, "Could not deliver partner_found");
            }
        }

        info!(
            group = %group.name(),
            first = %partner.id(),
            second = %session.id(),
            "Paired sessions"
        );
        Ok(Pairing::Paired(partner.id()))
    }

    /// Remove a pair in both directions, returning the former partner.
    fn unpair(&self, id: SessionId) -> Option<Arc<Session>> {
        let mut pairs = self.lock_pairs();
        let partner = pairs.remove(&id)?;
        pairs.remove(&partner.id());
        Some(partner)
    }

    fn lock_pairs(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        crate::lock(&self.pairs)
    }
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Matchmaker statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MatchmakerStats {
    /// Number of known groups.
    pub group_count: usize,
    /// Number of sessions across all groups.
    pub member_count: usize,
    /// Number of sessions waiting for a partner.
    pub waiting_count: usize,
    /// Number of active pairs.
    pub pair_count: usize,
}
