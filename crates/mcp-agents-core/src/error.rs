//! Error taxonomy shared by every layer of the session stack.

use thiserror::Error;

use crate::traits::SessionState;

/// Session error.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The server executable (or its interpreter) does not resolve to a runnable file.
    #[error("Executable not found: {0}")]
    NotFound(String),
    #[error("Spawn failed: {0}")]
    SpawnFailure(String),
    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Malformed or unexpected message, including JSON-RPC error responses.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The peer closed its end of the channel.
    #[error("Disconnected: {0}")]
    Disconnected(String),
    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },
    #[error("Agent runtime error: {0}")]
    Runtime(String),
    /// Controlling the child process (wait, kill) failed.
    #[error("Process error: {0}")]
    Process(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Operation not valid in state {0}")]
    InvalidState(SessionState),
    /// The consumer of a streaming query went away.
    #[error("Cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether this error leaves the remote peer in an unknown state.
    ///
    /// Fatal errors end the session: the manager moves to `Failed` and
    /// reconnection is left to the caller.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Timeout(_))
    }

    /// Whether this error only reports that a resource was already gone.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::Disconnected(_) | Self::NotConnected | Self::Cancelled
        )
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Disconnected(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(SessionError::Timeout("request".into()).is_fatal());
        assert!(SessionError::Disconnected("eof".into()).is_fatal());
        assert!(!SessionError::Protocol("bad".into()).is_fatal());
        assert!(!SessionError::NotConnected.is_fatal());
    }

    #[test]
    fn test_degraded_kinds() {
        assert!(SessionError::Cancelled.is_degraded());
        assert!(!SessionError::Timeout("close".into()).is_degraded());
        assert!(!SessionError::SpawnFailure("kill".into()).is_degraded());
    }

    #[test]
    fn test_display_carries_cause() {
        let err = SessionError::ToolInvocation {
            tool: "echo".into(),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Tool 'echo' failed: boom");
        assert_eq!(
            SessionError::InvalidState(SessionState::Ready).to_string(),
            "Operation not valid in state ready"
        );
    }
}
