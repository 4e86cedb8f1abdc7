//! MCP over stdio.
//!
//! Provides:
//! - Server command resolution
//! - Child-process transport with process-group teardown
//! - JSON-RPC line framing and message types
//! - Handshaken protocol session with a serial request dispatcher

pub mod codec;
pub mod command;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use codec::{Frame, JsonLineCodec};
pub use command::{CommandParts, ServerCommand};
pub use protocol::{Implementation, InitializeResult, PROTOCOL_VERSION};
pub use session::{ProtocolSession, SessionConfig};
pub use transport::{ChildTransport, LiveHandles, TransportConfig};
