use std::time::Duration;

pub const DEFAULT_MODEL: &str = "qwen3:0.6b";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama runtime settings.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Model tag, e.g. `qwen3:0.6b`.
    pub model: String,
    /// Server root; `/api/chat` is appended.
    pub base_url: String,
    pub temperature: f32,
    /// Model round trips allowed per query.
    pub max_steps: usize,
    pub request_timeout: Duration,
    /// Prepended to every conversation when set.
    pub system_prompt: Option<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            max_steps: 8,
            request_timeout: Duration::from_secs(120),
            system_prompt: None,
        }
    }
}

impl OllamaConfig {
    pub(crate) fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}
