//! How the manager obtains its transport and protocol session.

use std::sync::Arc;

use async_trait::async_trait;
use mcp_agents_core::{ProtocolChannel, SessionError, Transport, TransportIo};
use mcp_agents_stdio::{
    ChildTransport, LiveHandles, ProtocolSession, ServerCommand, SessionConfig, TransportConfig,
};

/// Acquires the two lowest links of the session chain.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Start the server process.
    async fn spawn(&self, command: &ServerCommand) -> Result<Box<dyn Transport>, SessionError>;

    /// Handshake over the process's byte channels.
    async fn open(&self, io: TransportIo) -> Result<Arc<dyn ProtocolChannel>, SessionError>;

    /// Transports spawned by this launcher that have not been reaped.
    fn live_handles(&self) -> usize;
}

/// Launches MCP servers as child processes speaking stdio.
#[derive(Debug, Clone, Default)]
pub struct StdioLauncher {
    transport: TransportConfig,
    session: SessionConfig,
    handles: LiveHandles,
}

impl StdioLauncher {
    #[must_use]
    pub fn new(transport: TransportConfig, session: SessionConfig) -> Self {
        Self {
            transport,
            session,
            handles: LiveHandles::new(),
        }
    }

    /// Gauge of live transports.
    #[must_use]
    pub const fn handles(&self) -> &LiveHandles {
        &self.handles
    }
}

#[async_trait]
impl Launcher for StdioLauncher {
    async fn spawn(&self, command: &ServerCommand) -> Result<Box<dyn Transport>, SessionError> {
        let transport = ChildTransport::spawn(command, &self.transport, &self.handles).await?;
        Ok(Box::new(transport))
    }

    async fn open(&self, io: TransportIo) -> Result<Arc<dyn ProtocolChannel>, SessionError> {
        let session = ProtocolSession::open(io, &self.session).await?;
        Ok(Arc::new(session))
    }

    fn live_handles(&self) -> usize {
        self.handles.count()
    }
}
