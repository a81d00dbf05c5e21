//! Connected client sessions.
//!
//! A session is shared (`Arc<Session>`) between its connection task, its
//! group and the pair registry. Other components hand it events through the
//! egress channel; the connection task drains the receiving half.

use crate::matchmaker::MatchError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tandem_protocol::Event;
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// A group name.
pub type GroupName = String;

/// Receiving half of a session's egress channel.
pub type Egress = mpsc::UnboundedReceiver<Event>;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0)
    }
}

/// Pairing state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Connected, not yet queued.
    Idle,
    /// Queued in a group, waiting for a partner.
    Waiting {
        /// Group the session is queued in.
        group: GroupName,
    },
    /// Linked to a partner.
    Paired {
        /// The partner session.
        partner: SessionId,
    },
    /// Torn down. Terminal.
    Closed,
}

/// One connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    group: Mutex<GroupName>,
    egress: mpsc::UnboundedSender<Event>,
    status: watch::Sender<SessionStatus>,
}

impl Session {
    /// Create a session for the given group.
    ///
    /// Returns the shared session and the receiving half of its egress channel.
    #[must_use]
    pub fn new(group: impl Into<GroupName>) -> (Arc<Self>, Egress) {
        let (egress, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus::Idle);
        let session = Self {
            id: SessionId::generate(),
            group: Mutex::new(group.into()),
            egress,
            status,
        };
        (Arc::new(session), rx)
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get the name of the group the session currently belongs to.
    #[must_use]
    pub fn group(&self) -> GroupName {
        crate::lock(&self.group).clone()
    }

    pub(crate) fn set_group(&self, group: impl Into<GroupName>) {
        *crate::lock(&self.group) = group.into();
    }

    /// Hand an event to this session for delivery to its remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Disconnected`] if the session's connection task
    /// has dropped its egress receiver.
    pub fn send(&self, event: Event) -> Result<(), MatchError> {
        trace!(session = %self.id, event = %event.kind, "Queueing event");
        self.egress
            .send(event)
            .map_err(|_| MatchError::Disconnected(self.id))
    }

    /// Get the current pairing state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch pairing state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Check if the session has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.status.borrow(), SessionStatus::Closed)
    }

    /// Get the partner, if paired.
    #[must_use]
    pub fn partner(&self) -> Option<SessionId> {
        match *self.status.borrow() {
            SessionStatus::Paired { partner } => Some(partner),
            _ => None,
        }
    }

    /// Wait until the session is paired.
    ///
    /// For in-process callers that need to block until matched. The egress
    /// channel is not gated on this: events such as `partner_left` reach a
    /// waiting session too.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Disconnected`] if the session closes first.
    pub async fn wait_for_partner(&self) -> Result<SessionId, MatchError> {
        let mut rx = self.status.subscribe();
        let status = rx
            .wait_for(|s| matches!(s, SessionStatus::Paired { .. } | SessionStatus::Closed))
            .await
            .map_err(|_| MatchError::Disconnected(self.id))?;

        match *status {
            SessionStatus::Paired { partner } => Ok(partner),
            _ => Err(MatchError::Disconnected(self.id)),
        }
    }

    /// Update the status. `Closed` is never left.
    ///
    /// Returns `true` if the status changed.
    pub(crate) fn set_status(&self, next: SessionStatus) -> bool {
        self.status.send_if_modified(|current| {
            if *current == SessionStatus::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Mark the session closed.
    ///
    /// Returns `true` if this call closed it.
    pub(crate) fn mark_closed(&self) -> bool {
        self.set_status(SessionStatus::Closed)
    }
}
