//! HTTP API over an MCP agent session.
//!
//! Provides:
//! - `router` - `/health`, `/generate` (blocking or NDJSON streaming), `/list_tools`
//! - `CorsConfig` - Origin policy parsed from a `*` or comma-separated list
//! - `ApiError` - `{"detail": ...}` error responses

pub mod cors;
pub mod error;
pub mod protocol;
pub mod routes;

pub use cors::CorsConfig;
pub use error::ApiError;
pub use protocol::{GenerateRequest, GenerateResponse, ListToolsResponse, ToolInfo};
pub use routes::router;
