//! Ollama-backed agent runtime.
//!
//! Sends the conversation plus the discovered MCP tools to `/api/chat`,
//! runs every tool call the model asks for and loops until the model
//! answers in plain text.

pub mod api;
pub mod config;
pub mod runtime;

pub use config::{DEFAULT_BASE_URL, DEFAULT_MODEL, OllamaConfig};
pub use runtime::{OllamaFactory, OllamaRuntime};
