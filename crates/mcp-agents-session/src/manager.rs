//! Session manager owning the whole acquisition chain.

use std::sync::{Arc, PoisonError, RwLock};

use mcp_agents_core::{
    ChatMessage, ConversationContext, ProtocolChannel, RuntimeFactory, SessionError,
    SessionState, ToolRegistry, ToolSpec,
};
use mcp_agents_stdio::ServerCommand;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

use crate::{
    launcher::Launcher,
    release::ReleaseStack,
    state::StateCell,
    stream::StreamBridge,
    worker::{Job, QueryWorker},
};

/// Resources reachable while connected.
struct Live {
    worker: Arc<QueryWorker>,
    tools: Vec<ToolSpec>,
    channel: Arc<dyn ProtocolChannel>,
}

/// Orchestrates transport, protocol session, tools and agent runtime.
///
/// One instance serves one connection: after `shutdown` (or a failure) a new
/// manager is needed.
pub struct SessionManager<L, F>
where
    L: Launcher,
    F: RuntimeFactory,
{
    launcher: L,
    factory: F,
    state: StateCell,
    live: RwLock<Option<Live>>,
    /// Held for the whole of `connect` and `shutdown`.
    releases: Mutex<ReleaseStack>,
}

impl<L, F> SessionManager<L, F>
where
    L: Launcher,
    F: RuntimeFactory,
{
    /// Create an unconnected manager.
    #[must_use]
    pub fn new(launcher: L, factory: F) -> Self {
        Self {
            launcher,
            factory,
            state: StateCell::new(),
            live: RwLock::new(None),
            releases: Mutex::new(ReleaseStack::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    #[must_use]
    pub const fn factory(&self) -> &F {
        &self.factory
    }

    /// Transports launched by this manager that are still alive.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.launcher.live_handles()
    }

    /// Spawn the server, handshake, discover tools and start the agent.
    ///
    /// # Errors
    /// `InvalidState` unless the manager is fresh. Any acquisition error is
    /// returned after everything acquired so far has been released; the
    /// manager is then `Failed`.
    pub async fn connect(&self, command: ServerCommand) -> Result<(), SessionError> {
        let mut releases = self.releases.lock().await;
        let state = self.state.get();
        if state != SessionState::Uninitialized {
            return Err(SessionError::InvalidState(state));
        }
        self.state.set(SessionState::Connecting);
        tracing::info!(server = %command.path.display(), "connecting to MCP server");

        match self.acquire(&command, &mut releases).await {
            Ok(live) => {
                tracing::info!(tools = live.tools.len(), "MCP session ready");
                *self.live.write().unwrap_or_else(PoisonError::into_inner) = Some(live);
                self.state.set(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "connect failed, releasing acquired resources");
                for (resource, err) in releases.release_all().await {
                    tracing::warn!(resource, error = %err, "release after failed connect");
                }
                self.state.set(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn acquire(
        &self,
        command: &ServerCommand,
        releases: &mut ReleaseStack,
    ) -> Result<Live, SessionError> {
        let mut transport = self.launcher.spawn(command).await?;
        let io = transport.take_io();
        releases.push("transport", move || async move { transport.close().await });
        let io = io.ok_or_else(|| SessionError::SpawnFailure("transport has no stdio".into()))?;

        let channel = self.launcher.open(io).await?;
        let session = Arc::clone(&channel);
        releases.push("session", move || async move { session.close().await });

        let registry = ToolRegistry::discover(&channel).await?;
        let tools = registry.specs();

        let context = ConversationContext::new();
        tracing::debug!(thread_id = %context.thread_id, "conversation context created");

        // the runtime is the registry's only owner from here on
        let runtime = self.factory.create(registry)?;
        let closing = Arc::clone(&runtime);
        releases.push("runtime", move || async move { closing.close().await });

        let worker = Arc::new(QueryWorker::spawn(
            runtime,
            context,
            Arc::clone(&channel),
            self.state.clone(),
        ));
        let stopping = Arc::clone(&worker);
        releases.push("query worker", move || async move { stopping.stop().await });

        Ok(Live {
            worker,
            tools,
            channel,
        })
    }

    /// Answer `message` and wait for the aggregated result.
    ///
    /// Queries run one at a time, in the order they were issued.
    ///
    /// # Errors
    /// `NotConnected` unless `Ready`; otherwise whatever the runtime or the
    /// tools report.
    pub async fn query(&self, message: ChatMessage) -> Result<Value, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.ready_worker()?.submit(Job::Invoke { message, reply })?;
        rx.await.map_err(|_| SessionError::NotConnected)?
    }

    /// Start answering `message` and return its event stream immediately.
    ///
    /// # Errors
    /// `NotConnected` unless `Ready`.
    pub fn query_stream(&self, message: ChatMessage) -> Result<StreamBridge, SessionError> {
        let (sink, bridge) = StreamBridge::channel();
        self.ready_worker()?.submit(Job::Stream { message, sink })?;
        Ok(bridge)
    }

    /// Tools discovered at connect time.
    ///
    /// # Errors
    /// `NotConnected` unless `Ready`.
    pub fn tools(&self) -> Result<Vec<ToolSpec>, SessionError> {
        self.with_live(|live| live.tools.clone())
    }

    fn ready_worker(&self) -> Result<Arc<QueryWorker>, SessionError> {
        self.with_live(|live| Arc::clone(&live.worker))
    }

    fn with_live<T>(&self, f: impl FnOnce(&Live) -> T) -> Result<T, SessionError> {
        if self.state.get() != SessionState::Ready {
            return Err(SessionError::NotConnected);
        }
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        let live = live.as_ref().ok_or(SessionError::NotConnected)?;
        if live.channel.is_closed() {
            self.state.fail_if_ready();
            return Err(SessionError::NotConnected);
        }
        Ok(f(live))
    }

    /// Release everything in reverse acquisition order.
    ///
    /// Errors from resources that were already gone are logged and
    /// swallowed; the first other error is returned once every release has
    /// run. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the first release failure that is not a degraded-resource error.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let mut releases = self.releases.lock().await;
        let state = self.state.get();
        if state.is_terminal() && releases.is_empty() {
            return Ok(());
        }
        if state != SessionState::Failed {
            self.state.set(SessionState::Closing);
        }
        tracing::info!(%state, pending = releases.len(), "shutting down MCP session");

        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut first = None;
        for (resource, err) in releases.release_all().await {
            if err.is_degraded() {
                tracing::debug!(resource, error = %err, "resource was already gone");
            } else if first.is_none() {
                first = Some(err);
            }
        }

        if state != SessionState::Failed {
            self.state.set(SessionState::Closed);
        }
        first.map_or(Ok(()), Err)
    }
}

impl<L, F> Drop for SessionManager<L, F>
where
    L: Launcher,
    F: RuntimeFactory,
{
    fn drop(&mut self) {
        if let Ok(releases) = self.releases.try_lock() {
            if !releases.is_empty() {
                tracing::warn!(
                    pending = ?releases.names().collect::<Vec<_>>(),
                    "session manager dropped without shutdown"
                );
            }
        }
    }
}
