//! # tandem-core
//!
//! Core types and coordination logic for the Tandem pairing relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Session** - One connected client: identity, group, egress channel, status
//! - **Group** - Named partition with a member set and a FIFO waiting queue
//! - **Matchmaker** - Pairs waiting sessions and owns the pair registry
//! - **EventRouter** - Maps event tags to handlers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│ Matchmaker  │────▶│    Group    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │ egress            ▼
//!        │            ┌─────────────┐
//!        └────────────│ EventRouter │
//!                     └─────────────┘
//! ```
//!
//! ## Locking
//!
//! Each group guards its members and waiting queue with its own mutex; the
//! matchmaker guards the pair registry with another. Whenever both are held
//! the group lock is taken first, so a pairing decision and the pair registry
//! update happen in one critical section per group.

pub mod group;
pub mod matchmaker;
pub mod router;
pub mod session;

pub use group::{validate_group_name, Group};
pub use matchmaker::{MatchError, Matchmaker, MatchmakerConfig, MatchmakerStats, Pairing};
pub use router::{EventHandler, EventRouter};
pub use session::{Egress, GroupName, Session, SessionId, SessionStatus};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
