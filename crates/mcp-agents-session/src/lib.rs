//! Session orchestration for MCP-backed agents.
//!
//! Provides:
//! - `SessionManager` - Connect, query and shut down one MCP server session
//! - `Launcher` / `StdioLauncher` - Transport and protocol session acquisition
//! - `StreamBridge` - Cancellable stream of query events
//! - `ReleaseStack` - Reverse-order resource teardown

pub mod launcher;
pub mod manager;
pub mod release;
mod state;
pub mod stream;
mod worker;

pub use launcher::{Launcher, StdioLauncher};
pub use manager::SessionManager;
pub use release::ReleaseStack;
pub use stream::{STREAM_CAPACITY, StreamBridge};
