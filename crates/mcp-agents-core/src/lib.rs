//! Core abstractions for MCP-backed agent sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionError` - Error taxonomy for every layer
//! - `ConversationContext` - Shared conversation state
//! - `QueryEvent` / `EventSink` - Streaming query output
//! - `ToolRegistry` - Tool discovery and invocation
//! - Transport, protocol channel and agent runtime traits

pub mod context;
pub mod error;
pub mod event;
pub mod tool;
pub mod traits;

pub use context::{ChatMessage, ConversationContext, Role, ToolCall};
pub use error::SessionError;
pub use event::{EventItem, EventSink, QueryEvent};
pub use tool::{ToolDescriptor, ToolRegistry, ToolSpec};
pub use traits::{
    AgentRuntime, ProtocolChannel, RuntimeFactory, SessionState, Transport, TransportIo,
};
