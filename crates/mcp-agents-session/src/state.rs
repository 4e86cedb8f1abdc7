use std::sync::{Arc, PoisonError, RwLock};

use mcp_agents_core::SessionState;

/// Lifecycle state shared between the manager and its query worker.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<RwLock<SessionState>>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(RwLock::new(SessionState::Uninitialized)))
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, next: SessionState) {
        let mut state = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "session state changed");
            *state = next;
        }
    }

    /// Move `Ready` to `Failed`. Returns whether the transition happened.
    pub(crate) fn fail_if_ready(&self) -> bool {
        let mut state = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Ready {
            *state = SessionState::Failed;
            tracing::warn!("session failed, further queries are rejected");
            true
        } else {
            false
        }
    }
}
