//! Command-line and environment configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use mcp_agents_http::CorsConfig;
use mcp_agents_ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL, OllamaConfig};
use mcp_agents_stdio::{ServerCommand, SessionConfig, TransportConfig};

#[derive(Debug, Parser)]
#[command(name = "mcp-agents-api-server", about = "Agent API over an MCP stdio server", version)]
pub struct Cli {
    /// MCP server script or executable.
    #[arg(long, env = "MCP_SERVER_FILE_PATH")]
    pub server: PathBuf,

    /// Interpreter used to run the server, e.g. `python3`.
    #[arg(long, env = "MCP_SERVER_INTERPRETER")]
    pub interpreter: Option<String>,

    #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "OLLAMA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub ollama_base_url: String,

    /// Model round trips allowed per query.
    #[arg(long, env = "MAX_STEPS", default_value_t = 8)]
    pub max_steps: usize,

    #[arg(long, env = "SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    /// `*` or a comma-separated list of origins.
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind: String,

    #[arg(long, env = "HANDSHAKE_TIMEOUT_SECS", default_value_t = 30)]
    pub handshake_timeout_secs: u64,

    /// Per MCP request.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Per model round trip.
    #[arg(long, env = "MODEL_TIMEOUT_SECS", default_value_t = 120)]
    pub model_timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MCP server path is empty")]
    EmptyServerPath,
    #[error("invalid bind address '{value}': {source}")]
    BindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Validated settings for each layer of the server.
#[derive(Debug)]
pub struct Settings {
    pub command: ServerCommand,
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub ollama: OllamaConfig,
    pub cors: CorsConfig,
    pub bind: SocketAddr,
}

impl Cli {
    pub fn settings(self) -> Result<Settings, ConfigError> {
        if self.server.as_os_str().is_empty() {
            return Err(ConfigError::EmptyServerPath);
        }
        let bind = self
            .bind
            .parse()
            .map_err(|source| ConfigError::BindAddr {
                value: self.bind.clone(),
                source,
            })?;
        let handshake_timeout = non_zero("HANDSHAKE_TIMEOUT_SECS", self.handshake_timeout_secs)?;
        let request_timeout = non_zero("REQUEST_TIMEOUT_SECS", self.request_timeout_secs)?;
        let model_timeout = non_zero("MODEL_TIMEOUT_SECS", self.model_timeout_secs)?;
        if self.max_steps == 0 {
            return Err(ConfigError::Zero("MAX_STEPS"));
        }

        let mut command = ServerCommand::new(self.server);
        if let Some(interpreter) = self.interpreter.filter(|i| !i.trim().is_empty()) {
            command = command.interpreter(interpreter);
        }

        Ok(Settings {
            command,
            transport: TransportConfig::default(),
            session: SessionConfig {
                handshake_timeout,
                request_timeout,
                ..SessionConfig::default()
            },
            ollama: OllamaConfig {
                model: self.model,
                base_url: self.ollama_base_url,
                max_steps: self.max_steps,
                request_timeout: model_timeout,
                system_prompt: self.system_prompt,
                ..OllamaConfig::default()
            },
            cors: CorsConfig::parse(&self.cors_origins),
            bind,
        })
    }
}

const fn non_zero(name: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        Err(ConfigError::Zero(name))
    } else {
        Ok(Duration::from_secs(secs))
    }
}
