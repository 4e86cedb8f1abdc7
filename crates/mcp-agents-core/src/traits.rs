//! Core traits at the seams of the session stack.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{ChatMessage, ConversationContext, EventSink, SessionError, ToolRegistry};

/// Lifecycle state of a session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing acquired yet.
    Uninitialized,
    /// Acquisition chain is being built.
    Connecting,
    /// Accepting queries.
    Ready,
    /// Resources are being released.
    Closing,
    /// Shut down cleanly.
    Closed,
    /// Connect failed or the peer was lost; the instance must not be reused.
    Failed,
}

impl SessionState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Byte channels connected to a child's stdout (reader) and stdin (writer).
pub struct TransportIo {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl TransportIo {
    /// Bundle a reader and writer.
    #[must_use]
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl fmt::Debug for TransportIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportIo").finish_non_exhaustive()
    }
}

/// A spawned peer process.
#[async_trait]
pub trait Transport: Send {
    /// Hand out the byte channels. Returns `None` once taken.
    fn take_io(&mut self) -> Option<TransportIo>;

    /// Terminate and reap the process. Safe to call more than once.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// A handshaken request/response channel to the peer.
#[async_trait]
pub trait ProtocolChannel: Send + Sync {
    /// Send a request and await its result payload.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, SessionError>;

    /// Release the underlying byte channels. Safe to call more than once.
    async fn close(&self) -> Result<(), SessionError>;

    /// Whether the channel can no longer carry requests.
    fn is_closed(&self) -> bool;
}

/// Reasoning engine that answers queries using the discovered tools.
///
/// Implementations must leave `ctx` untouched when they fail; the caller
/// restores a snapshot as well, but a runtime should not rely on that.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Answer `message` and return the aggregated result.
    async fn invoke(
        &self,
        ctx: &mut ConversationContext,
        message: ChatMessage,
    ) -> Result<Value, SessionError>;

    /// Answer `message`, emitting incremental events through `events`.
    ///
    /// The returned value becomes the stream's final event.
    async fn stream(
        &self,
        ctx: &mut ConversationContext,
        message: ChatMessage,
        events: EventSink,
    ) -> Result<Value, SessionError>;

    /// Release runtime resources.
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Builds an [`AgentRuntime`] bound to a tool registry.
pub trait RuntimeFactory: Send + Sync {
    /// Create a runtime for `tools`.
    ///
    /// # Errors
    /// Returns error if the runtime cannot be configured.
    fn create(&self, tools: ToolRegistry) -> Result<std::sync::Arc<dyn AgentRuntime>, SessionError>;
}
