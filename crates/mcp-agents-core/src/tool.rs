//! Tool discovery and invocation over a protocol channel.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Weak},
};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{ProtocolChannel, SessionError};

/// Method listing the peer's tools.
pub const LIST_TOOLS: &str = "tools/list";
/// Method invoking one tool.
pub const CALL_TOOL: &str = "tools/call";

/// Public description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments.
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object"})
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<RawTool>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
struct CallToolParams<'a> {
    name: &'a str,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(rename = "structuredContent", default)]
    structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

impl CallToolResult {
    fn text(&self) -> Option<String> {
        if self.content.is_empty() {
            return None;
        }
        let texts: Option<Vec<&str>> = self
            .content
            .iter()
            .map(|item| match item.get("type").and_then(Value::as_str) {
                Some("text") => item.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect();
        texts.map(|t| t.join("\n"))
    }

    fn into_value(self) -> Value {
        if let Some(text) = self.text() {
            return Value::String(text);
        }
        self.structured_content
            .unwrap_or(Value::Array(self.content))
    }
}

/// A locally invokable tool backed by the peer.
#[derive(Clone)]
pub struct ToolDescriptor {
    spec: ToolSpec,
    channel: Weak<dyn ProtocolChannel>,
}

impl ToolDescriptor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.spec.description
    }

    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.spec.input_schema
    }

    #[must_use]
    pub const fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// Invoke the tool with `args`.
    ///
    /// All-text results decode to a JSON string; anything else to the
    /// structured content or the raw content array.
    ///
    /// # Errors
    /// `NotConnected` once the owning session is gone, `ToolInvocation` if the
    /// tool reported failure, otherwise whatever the channel reports.
    pub async fn invoke(&self, args: Value) -> Result<Value, SessionError> {
        let channel = self.channel.upgrade().ok_or(SessionError::NotConnected)?;
        if channel.is_closed() {
            return Err(SessionError::NotConnected);
        }

        let params = serde_json::to_value(CallToolParams {
            name: &self.spec.name,
            arguments: args,
        })?;
        tracing::debug!(tool = %self.spec.name, "invoking tool");
        let raw = channel.request(CALL_TOOL, Some(params)).await?;
        let result: CallToolResult = serde_json::from_value(raw)?;

        if result.is_error {
            let message = result
                .text()
                .unwrap_or_else(|| Value::Array(result.content).to_string());
            return Err(SessionError::ToolInvocation {
                tool: self.spec.name.clone(),
                message,
            });
        }
        Ok(result.into_value())
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Ordered, immutable set of discovered tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<[ToolDescriptor]>,
}

impl ToolRegistry {
    /// Ask the peer for its tools.
    ///
    /// Discovery happens once per session; a fresh set requires a fresh session.
    ///
    /// # Errors
    /// Returns `Protocol` if the listing is malformed or names repeat.
    pub async fn discover(channel: &Arc<dyn ProtocolChannel>) -> Result<Self, SessionError> {
        let raw = channel.request(LIST_TOOLS, None).await?;
        let listing: ListToolsResult = serde_json::from_value(raw)?;
        if listing.next_cursor.is_some() {
            tracing::warn!("peer paginated its tool list; only the first page is used");
        }

        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(listing.tools.len());
        for raw in listing.tools {
            if !seen.insert(raw.name.clone()) {
                return Err(SessionError::Protocol(format!(
                    "duplicate tool name: {}",
                    raw.name
                )));
            }
            tools.push(ToolDescriptor {
                spec: ToolSpec {
                    name: raw.name,
                    description: raw.description.unwrap_or_default(),
                    input_schema: raw.input_schema.unwrap_or_else(default_schema),
                },
                channel: Arc::downgrade(channel),
            });
        }

        tracing::info!(
            tools = ?tools.iter().map(ToolDescriptor::name).collect::<Vec<_>>(),
            "discovered tools"
        );
        Ok(Self {
            tools: tools.into(),
        })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name() == name)
    }

    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
