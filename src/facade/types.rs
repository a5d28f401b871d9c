// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dependency lifecycle types.
//!
//! The store keeps its backend and connector handles in [`Slot`]s published
//! through `tokio::sync::watch`, so a handle and its state change together
//! and readers never see a half-written handle.
//!
//! # State Transitions
//!
//! ```text
//!            open()                 driver ok
//! Unopened ─────────→ Opening ──────────────────→ Ready
//!                        │                          │
//!                        │ driver error             │ close()
//!                        ↓                          ↓
//!                     Failed ─────────────────→  Closed
//!                              close()
//! ```
//!
//! An open that finishes after `close()` finds `Closed` and closes its
//! handle instead of publishing it.

use std::sync::Arc;

/// Observable state of a store dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// `open()` has not been called.
    Unopened,

    /// The driver is opening the dependency in the background.
    ///
    /// Calls that need it fail with `NotAvailable` until it settles.
    Opening,

    /// Open and serving calls.
    Ready,

    /// The driver failed. The error was logged; the store stays degraded.
    Failed,

    /// `close()` has run.
    Closed,
}

impl std::fmt::Display for DependencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyState::Unopened => write!(f, "Unopened"),
            DependencyState::Opening => write!(f, "Opening"),
            DependencyState::Ready => write!(f, "Ready"),
            DependencyState::Failed => write!(f, "Failed"),
            DependencyState::Closed => write!(f, "Closed"),
        }
    }
}

/// A dependency handle together with its lifecycle state.
pub enum Slot<T: ?Sized> {
    Unopened,
    Opening,
    Ready(Arc<T>),
    /// Holds the open error's message.
    Failed(String),
    Closed,
}

impl<T: ?Sized> Slot<T> {
    pub fn state(&self) -> DependencyState {
        match self {
            Slot::Unopened => DependencyState::Unopened,
            Slot::Opening => DependencyState::Opening,
            Slot::Ready(_) => DependencyState::Ready,
            Slot::Failed(_) => DependencyState::Failed,
            Slot::Closed => DependencyState::Closed,
        }
    }

    /// The handle, if ready.
    pub fn ready(&self) -> Option<Arc<T>> {
        match self {
            Slot::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Whether the slot has stopped changing on its own.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Slot::Unopened | Slot::Opening)
    }
}

impl<T: ?Sized> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Unopened => Slot::Unopened,
            Slot::Opening => Slot::Opening,
            Slot::Ready(handle) => Slot::Ready(Arc::clone(handle)),
            Slot::Failed(msg) => Slot::Failed(msg.clone()),
            Slot::Closed => Slot::Closed,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Failed(msg) => write!(f, "Failed({})", msg),
            other => write!(f, "{}", other.state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_state_display() {
        assert_eq!(DependencyState::Unopened.to_string(), "Unopened");
        assert_eq!(DependencyState::Opening.to_string(), "Opening");
        assert_eq!(DependencyState::Ready.to_string(), "Ready");
        assert_eq!(DependencyState::Failed.to_string(), "Failed");
        assert_eq!(DependencyState::Closed.to_string(), "Closed");
    }

    #[test]
    fn test_slot_state_and_handle() {
        let slot: Slot<str> = Slot::Ready(Arc::from("handle"));
        assert_eq!(slot.state(), DependencyState::Ready);
        assert_eq!(slot.ready().as_deref(), Some("handle"));
        assert!(slot.is_settled());

        let slot: Slot<str> = Slot::Opening;
        assert!(slot.ready().is_none());
        assert!(!slot.is_settled());
    }

    #[test]
    fn test_slot_clone_shares_handle() {
        let handle: Arc<str> = Arc::from("x");
        let slot: Slot<str> = Slot::Ready(Arc::clone(&handle));
        let cloned = slot.clone();
        assert_eq!(Arc::strong_count(&handle), 3);
        assert_eq!(cloned.state(), DependencyState::Ready);
    }

    #[test]
    fn test_slot_debug() {
        let slot: Slot<str> = Slot::Failed("boom".to_string());
        assert_eq!(format!("{:?}", slot), "Failed(boom)");
        assert_eq!(format!("{:?}", Slot::<str>::Closed), "Closed");
    }
}
