//! JSON-RPC 2.0 message shapes used on the MCP stdio channel.

use mcp_agents_core::SessionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
/// Protocol revision requested during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_LOG_MESSAGE: &str = "notifications/message";
/// Sent when the client stops waiting for one of its requests.
pub const METHOD_CANCELLED: &str = "notifications/cancelled";

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Outgoing request.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

impl<'a> Request<'a> {
    #[must_use]
    pub const fn new(id: u64, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Outgoing notification.
#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

impl<'a> Notification<'a> {
    #[must_use]
    pub const fn new(method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Outgoing reply to a peer-initiated request.
#[derive(Debug, Serialize)]
pub struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Response {
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub const fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message the peer can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: Value,
        outcome: Result<Value, RpcError>,
    },
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl Incoming {
    /// Classify one line received from the peer.
    ///
    /// # Errors
    /// Returns `Protocol` if the line is not a JSON-RPC message.
    pub fn parse(line: &str) -> Result<Self, SessionError> {
        let raw: RawMessage = serde_json::from_str(line)?;
        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(Self::Request {
                id,
                method,
                params: raw.params,
            }),
            (None, Some(method)) => Ok(Self::Notification {
                method,
                params: raw.params,
            }),
            (Some(id), None) => {
                let outcome = match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(Self::Response { id, outcome })
            }
            (None, None) => Err(SessionError::Protocol(format!(
                "message has neither id nor method: {line}"
            ))),
        }
    }
}

/// Name and version of either side of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: Implementation,
}

/// Handshake-derived server state.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Implementation,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let params = json!({"name": "echo"});
        let line = serde_json::to_string(&Request::new(7, "tools/call", Some(&params))).unwrap();
        assert_eq!(
            line,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo"}}"#
        );

        let bare = serde_json::to_string(&Notification::new(METHOD_INITIALIZED, None)).unwrap();
        assert_eq!(bare, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    }

    #[test]
    fn test_classifies_incoming() {
        assert_eq!(
            Incoming::parse(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).unwrap(),
            Incoming::Response {
                id: json!(1),
                outcome: Ok(json!({"ok": true}))
            }
        );
        assert!(matches!(
            Incoming::parse(r#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#).unwrap(),
            Incoming::Request { method, .. } if method == "ping"
        ));
        assert!(matches!(
            Incoming::parse(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#)
                .unwrap(),
            Incoming::Notification { .. }
        ));
    }

    #[test]
    fn test_error_response_and_garbage() {
        let parsed = Incoming::parse(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"bad params"}}"#,
        )
        .unwrap();
        let Incoming::Response { outcome: Err(err), .. } = parsed else {
            panic!("expected error response");
        };
        assert_eq!(err.code, -32602);

        assert!(Incoming::parse("Timed out while fetching URL").is_err());
        assert!(Incoming::parse(r#"{"jsonrpc":"2.0"}"#).is_err());
    }
}
