//! Group abstraction for Tandem.
//!
//! Groups are named partitions of sessions; only sessions in the same group
//! are ever paired. A group holds its member set and a FIFO queue of
//! sessions waiting for a partner.

use crate::session::{GroupName, Session, SessionId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Maximum group name length.
pub const MAX_GROUP_NAME_LENGTH: usize = 256;

/// Validate a group name.
///
/// # Errors
///
/// Returns an error message if the group name is invalid.
pub fn validate_group_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Group name cannot be empty");
    }
    if name.len() > MAX_GROUP_NAME_LENGTH {
        return Err("Group name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Group name contains control characters");
    }
    Ok(())
}

/// Membership and queue state, guarded by the group's lock.
#[derive(Debug, Default)]
pub(crate) struct GroupState {
    members: HashMap<SessionId, Arc<Session>>,
    waiting: VecDeque<Arc<Session>>,
}

impl GroupState {
    pub(crate) fn join(&mut self, session: &Arc<Session>) -> bool {
        self.members
            .insert(session.id(), Arc::clone(session))
            .is_none()
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.members.contains_key(&id)
    }

    /// Remove a session from the member set and the waiting queue.
    pub(crate) fn leave(&mut self, id: SessionId) -> bool {
        self.waiting.retain(|s| s.id() != id);
        self.members.remove(&id).is_some()
    }

    pub(crate) fn enqueue(&mut self, session: &Arc<Session>) {
        if !self.is_waiting(session.id()) {
            self.waiting.push_back(Arc::clone(session));
        }
    }

    /// Pop the longest-waiting open session other than `exclude`.
    ///
    /// Closed sessions reached along the way are dropped from the queue.
    pub(crate) fn next_waiting(&mut self, exclude: SessionId) -> Option<Arc<Session>> {
        let position = self.waiting.iter().position(|s| s.id() != exclude && !s.is_closed())?;

        let mut skipped = Vec::new();
        for _ in 0..position {
            if let Some(s) = self.waiting.pop_front() {
                if !s.is_closed() {
                    skipped.push(s);
                }
            }
        }
        let next = self.waiting.pop_front();
        for s in skipped.into_iter().rev() {
            self.waiting.push_front(s);
        }
        next
    }

    pub(crate) fn is_waiting(&self, id: SessionId) -> bool {
        self.waiting.iter().any(|s| s.id() == id)
    }
}

/// A named group of sessions.
#[derive(Debug)]
pub struct Group {
    name: GroupName,
    state: Mutex<GroupState>,
}

impl Group {
    /// Create a new, empty group.
    #[must_use]
    pub fn new(name: impl Into<GroupName>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(GroupState::default()),
        }
    }

    /// Get the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a session to the member set.
    ///
    /// Returns `true` if the session was not already a member.
    pub fn join(&self, session: &Arc<Session>) -> bool {
        let added = self.lock().join(session);
        if added {
            debug!(group = %self.name, session = %session.id(), "Session joined group");
        }
        added
    }

    /// Remove a session from the group. No-op if it is not a member.
    ///
    /// Returns `true` if the session was a member.
    pub fn leave(&self, id: SessionId) -> bool {
        let removed = self.lock().leave(id);
        if removed {
            debug!(group = %self.name, session = %id, "Session left group");
        }
        removed
    }

    /// Check if a session is a member.
    #[must_use]
    pub fn is_member(&self, id: SessionId) -> bool {
        self.lock().members.contains_key(&id)
    }

    /// Check if a session is queued for a partner.
    #[must_use]
    pub fn is_waiting(&self, id: SessionId) -> bool {
        self.lock().is_waiting(id)
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.lock().members.len()
    }

    /// Get the number of queued sessions.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Get all member IDs.
    #[must_use]
    pub fn members(&self) -> Vec<SessionId> {
        self.lock().members.keys().copied().collect()
    }

    /// Check if the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().members.is_empty()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GroupState> {
        trace!(group = %self.name, "Locking group");
        crate::lock(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_creation() {
        let group = Group::new("chess");
        assert_eq!(group.name(), "chess");
        assert_eq!(group.member_count(), 0);
        assert!(group.is_empty());
    }

    #[test]
    fn test_group_join_leave() {
        let group = Group::new("test");
        let (a, _rx_a) = Session::new("test");
        let (b, _rx_b) = Session::new("test");

        assert!(group.join(&a));
        assert!(!group.join(&a));
        assert!(group.join(&b));
        assert_eq!(group.member_count(), 2);

        assert!(group.leave(a.id()));
        assert!(!group.is_member(a.id()));
        assert_eq!(group.member_count(), 1);

        // Leaving twice is a no-op
        assert!(!group.leave(a.id()));
    }

    #[test]
    fn test_leave_clears_queue() {
        let group = Group::new("test");
        let (a, _rx) = Session::new("test");
        {
            let mut state = group.lock();
            state.join(&a);
            state.enqueue(&a);
            state.enqueue(&a);
        }
        assert_eq!(group.waiting_count(), 1);

        group.leave(a.id());
        assert!(!group.is_waiting(a.id()));
    }

    #[test]
    fn test_next_waiting_is_fifo() {
        let group = Group::new("test");
        let (a, _rx_a) = Session::new("test");
        let (b, _rx_b) = Session::new("test");
        let (c, _rx_c) = Session::new("test");

        let mut state = group.lock();
        state.enqueue(&a);
        state.enqueue(&b);

        assert_eq!(state.next_waiting(c.id()).unwrap().id(), a.id());
        assert_eq!(state.next_waiting(c.id()).unwrap().id(), b.id());
        assert!(state.next_waiting(c.id()).is_none());
    }

    #[test]
    fn test_next_waiting_skips_self_and_closed() {
        let group = Group::new("test");
        let (a, _rx_a) = Session::new("test");
        let (b, _rx_b) = Session::new("test");
        let (c, _rx_c) = Session::new("test");

        let mut state = group.lock();
        state.enqueue(&a);
        state.enqueue(&b);
        state.enqueue(&c);
        b.mark_closed();

        // a is excluded, b is closed and dropped, c is next
        assert_eq!(state.next_waiting(a.id()).unwrap().id(), c.id());
        assert!(state.is_waiting(a.id()));
        assert!(!state.is_waiting(b.id()));
    }

    #[test]
    fn test_group_name_validation() {
        assert!(validate_group_name("rust:beginners").is_ok());
        assert!(validate_group_name("").is_err());
        assert!(validate_group_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_GROUP_NAME_LENGTH + 1);
        assert!(validate_group_name(&long_name).is_err());
    }
}
