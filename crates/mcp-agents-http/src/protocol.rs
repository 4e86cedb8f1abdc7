//! Request and response bodies of the HTTP API.

use mcp_agents_core::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /generate` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub query: String,
    #[serde(default)]
    pub stream: bool,
}

/// Non-streaming `POST /generate` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub messages: Value,
}

/// `GET /health` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}

/// One entry of `GET /list_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub args_schema: Value,
}

impl From<ToolSpec> for ToolInfo {
    fn from(spec: ToolSpec) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            args_schema: spec.input_schema,
        }
    }
}

/// `GET /list_tools` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolInfo>,
}

/// Error body for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Last line of a stream that failed midway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFailure {
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_stream_defaults_to_false() {
        let req: GenerateRequest = serde_json::from_value(json!({"query": "2+2"})).unwrap();
        assert!(!req.stream);
    }

    #[test]
    fn test_tool_info_renames_schema() {
        let spec: ToolSpec = serde_json::from_value(json!({
            "name": "echo",
            "description": "Echo",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        let info = serde_json::to_value(ToolInfo::from(spec)).unwrap();
        assert_eq!(
            info,
            json!({"name": "echo", "description": "Echo", "args_schema": {"type": "object"}})
        );
    }

    #[test]
    fn test_stream_failure_line() {
        let line = serde_json::to_string(&StreamFailure::Error {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(line, r#"{"type":"error","message":"boom"}"#);
    }
}
