//! Tool-calling chat loop over Ollama.

use std::sync::Arc;

use async_trait::async_trait;
use mcp_agents_core::{
    AgentRuntime, ChatMessage, ConversationContext, EventSink, QueryEvent, RuntimeFactory,
    SessionError, ToolRegistry,
};
use serde_json::{Value, json};

use crate::{
    api::{ChatOptions, ChatRequest, ChatResponse, WireMessage, WireTool},
    config::OllamaConfig,
};

/// Creates an [`OllamaRuntime`] per connected session.
#[derive(Debug, Clone)]
pub struct OllamaFactory {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaFactory {
    /// # Errors
    /// Returns `Runtime` if the HTTP client cannot be built.
    pub fn new(config: OllamaConfig) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SessionError::Runtime(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }
}

impl RuntimeFactory for OllamaFactory {
    fn create(&self, tools: ToolRegistry) -> Result<Arc<dyn AgentRuntime>, SessionError> {
        tracing::info!(
            model = %self.config.model,
            base_url = %self.config.base_url,
            tools = tools.len(),
            "creating Ollama runtime"
        );
        Ok(Arc::new(OllamaRuntime {
            client: self.client.clone(),
            config: self.config.clone(),
            tools,
        }))
    }
}

/// Answers queries with an Ollama chat model that may call MCP tools.
pub struct OllamaRuntime {
    client: reqwest::Client,
    config: OllamaConfig,
    tools: ToolRegistry,
}

impl OllamaRuntime {
    async fn run_turn(
        &self,
        ctx: &mut ConversationContext,
        message: ChatMessage,
        events: Option<&EventSink>,
    ) -> Result<Value, SessionError> {
        let mut turn = vec![message];

        for step in 1..=self.config.max_steps {
            let reply = self.chat(ctx, &turn).await?.message;
            let calls = reply.calls();
            tracing::debug!(step, tool_calls = calls.len(), "model replied");

            if !reply.content.is_empty() {
                emit(events, QueryEvent::ContentDelta {
                    text: reply.content.clone(),
                })
                .await?;
            }
            turn.push(ChatMessage::assistant(reply.content.clone(), calls.clone()));

            if calls.is_empty() {
                let result = json!({
                    "content": reply.content,
                    "messages": serde_json::to_value(&turn)?,
                });
                ctx.extend(turn);
                return Ok(result);
            }

            for call in calls {
                emit(events, QueryEvent::ToolInvocation {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                })
                .await?;

                let (content, is_error) = match self.call_tool(&call.name, call.args).await {
                    Ok(content) => (content, false),
                    Err(e) if e.is_fatal() || matches!(e, SessionError::NotConnected) => {
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                        (Value::String(e.to_string()), true)
                    }
                };

                emit(events, QueryEvent::ToolResult {
                    id: call.id,
                    name: call.name.clone(),
                    content: content.clone(),
                    is_error,
                })
                .await?;
                turn.push(ChatMessage::tool(call.name, tool_text(content)));
            }
        }

        Err(SessionError::Runtime(format!(
            "no final answer after {} model steps",
            self.config.max_steps
        )))
    }

    async fn chat(
        &self,
        ctx: &ConversationContext,
        turn: &[ChatMessage],
    ) -> Result<ChatResponse, SessionError> {
        let system = self
            .config
            .system_prompt
            .as_ref()
            .map(|prompt| WireMessage {
                role: "system".to_string(),
                content: prompt.clone(),
                ..WireMessage::default()
            });
        let messages = system
            .into_iter()
            .chain(ctx.messages.iter().chain(turn).map(WireMessage::from))
            .collect();
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            tools: self.tools.specs().into_iter().map(WireTool::from).collect(),
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .client
            .post(self.config.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| SessionError::Runtime(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SessionError::Runtime(format!(
                "model returned HTTP {status}: {body}"
            )));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| SessionError::Runtime(format!("invalid model reply: {e}")))
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, SessionError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| SessionError::ToolInvocation {
                tool: name.to_string(),
                message: "no such tool".to_string(),
            })?;
        tool.invoke(args).await
    }
}

#[async_trait]
impl AgentRuntime for OllamaRuntime {
    async fn invoke(
        &self,
        ctx: &mut ConversationContext,
        message: ChatMessage,
    ) -> Result<Value, SessionError> {
        self.run_turn(ctx, message, None).await
    }

    async fn stream(
        &self,
        ctx: &mut ConversationContext,
        message: ChatMessage,
        events: EventSink,
    ) -> Result<Value, SessionError> {
        self.run_turn(ctx, message, Some(&events)).await
    }
}

async fn emit(events: Option<&EventSink>, event: QueryEvent) -> Result<(), SessionError> {
    match events {
        Some(sink) => sink.emit(event).await,
        None => Ok(()),
    }
}

fn tool_text(content: Value) -> String {
    match content {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
