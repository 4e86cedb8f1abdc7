//! MCP client session over a line-oriented byte channel.
//!
//! After the `initialize` handshake a single dispatcher task owns both
//! channels. Requests are queued to it and handled strictly one at a time:
//! the next request is written only after the previous one has been
//! answered. When a caller stops waiting, the server is sent
//! `notifications/cancelled` and the late answer is discarded.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mcp_agents_core::{ProtocolChannel, SessionError, TransportIo};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

use crate::{
    codec::{Frame, JsonLineCodec},
    protocol::{
        Implementation, Incoming, InitializeParams, InitializeResult, METHOD_CANCELLED,
        METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_LOG_MESSAGE, METHOD_NOT_FOUND, METHOD_PING, Notification,
        PROTOCOL_VERSION, Request, Response, RpcError,
    },
};

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub protocol_version: String,
    pub client_info: Implementation,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: Implementation {
                name: "mcp-agents".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

struct Outbound {
    method: String,
    params: Option<Value>,
    reply: oneshot::Sender<Result<Value, SessionError>>,
}

/// A handshaken MCP client session.
pub struct ProtocolSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    server: InitializeResult,
    cancel: CancellationToken,
    peer_lost: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolSession {
    /// Perform the handshake and start the dispatcher.
    ///
    /// # Errors
    /// `HandshakeFailure` if the peer exits or rejects `initialize`,
    /// `Timeout` if it does not answer within `handshake_timeout`.
    pub async fn open(io: TransportIo, config: &SessionConfig) -> Result<Self, SessionError> {
        let mut dispatcher = Dispatcher {
            reader: FramedRead::new(io.reader, JsonLineCodec::new()),
            writer: FramedWrite::new(io.writer, JsonLineCodec::new()),
            next_id: 1,
            request_timeout: config.request_timeout,
        };

        let server = dispatcher.handshake(config).await?;
        tracing::info!(
            server = %server.server_info.name,
            version = %server.server_info.version,
            protocol = %server.protocol_version,
            "MCP session initialized"
        );

        let (outbound, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let peer_lost = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(dispatcher.run(rx, cancel.clone(), Arc::clone(&peer_lost)));

        Ok(Self {
            outbound,
            server,
            cancel,
            peer_lost,
            dispatcher: Mutex::new(Some(task)),
        })
    }

    /// Handshake-derived server state.
    #[must_use]
    pub const fn server(&self) -> &InitializeResult {
        &self.server
    }

    /// Protocol revision the server agreed to.
    #[must_use]
    pub fn protocol_version(&self) -> &str {
        &self.server.protocol_version
    }
}

#[async_trait]
impl ProtocolChannel for ProtocolSession {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::NotConnected);
        }
        if self.peer_lost.load(Ordering::SeqCst) {
            return Err(SessionError::Disconnected("session ended".into()));
        }

        let (reply, rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                method: method.to_string(),
                params,
                reply,
            })
            .map_err(|_| SessionError::Disconnected("session ended".into()))?;
        rx.await
            .map_err(|_| SessionError::Disconnected("dispatcher stopped".into()))?
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.cancel.cancel();
        let Some(task) = self.dispatcher.lock().await.take() else {
            return Ok(());
        };
        match task.await {
            Ok(()) => {
                tracing::debug!("MCP session closed");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(SessionError::Protocol(format!("dispatcher panicked: {e}"))),
        }
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.peer_lost.load(Ordering::SeqCst)
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, JsonLineCodec>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, JsonLineCodec>;

struct Dispatcher {
    reader: Reader,
    writer: Writer,
    next_id: u64,
    request_timeout: Duration,
}

impl Dispatcher {
    async fn handshake(&mut self, config: &SessionConfig) -> Result<InitializeResult, SessionError> {
        let params = serde_json::to_value(InitializeParams {
            protocol_version: config.protocol_version.clone(),
            capabilities: json!({}),
            client_info: config.client_info.clone(),
        })?;

        let id = self.allocate_id();
        let raw = self
            .round_trip(id, METHOD_INITIALIZE, Some(params), config.handshake_timeout)
            .await
            .map_err(|e| match e {
                SessionError::Timeout(msg) => SessionError::Timeout(msg),
                other => SessionError::HandshakeFailure(other.to_string()),
            })?;
        let server: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| SessionError::HandshakeFailure(format!("bad initialize result: {e}")))?;

        if server.protocol_version != config.protocol_version {
            tracing::warn!(
                requested = %config.protocol_version,
                agreed = %server.protocol_version,
                "server negotiated a different protocol version"
            );
        }

        self.send(&Notification::new(METHOD_INITIALIZED, None))
            .await
            .map_err(|e| SessionError::HandshakeFailure(e.to_string()))?;
        Ok(server)
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Outbound>,
        cancel: CancellationToken,
        peer_lost: Arc<AtomicBool>,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outbound = rx.recv() => {
                    let Some(Outbound { method, params, mut reply }) = outbound else {
                        break;
                    };
                    if reply.is_closed() {
                        tracing::debug!(%method, "caller gone before dispatch, dropping request");
                        continue;
                    }
                    let id = self.allocate_id();
                    let timeout = self.request_timeout;
                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => Err(SessionError::NotConnected),
                        result = self.round_trip(id, &method, params, timeout) => result,
                        () = reply.closed() => Err(SessionError::Cancelled),
                    };
                    if matches!(result, Err(SessionError::Cancelled)) {
                        if let Err(e) = self.cancel_request(id, &method).await {
                            tracing::warn!(error = %e, "MCP channel failed");
                            peer_lost.store(true, Ordering::SeqCst);
                            break;
                        }
                        continue;
                    }
                    let fatal = result.as_ref().is_err_and(SessionError::is_fatal);
                    if let Err(ref e) = result {
                        tracing::warn!(%method, error = %e, fatal, "MCP request failed");
                    }
                    let _ = reply.send(result);
                    if fatal {
                        peer_lost.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                line = self.reader.next() => {
                    match line {
                        None => {
                            tracing::info!("MCP server closed its output");
                            peer_lost.store(true, Ordering::SeqCst);
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "MCP channel failed");
                            peer_lost.store(true, Ordering::SeqCst);
                            break;
                        }
                        Some(Ok(Frame::Malformed(reason))) => {
                            tracing::warn!(%reason, "skipping unreadable line");
                        }
                        Some(Ok(Frame::Line(line))) => {
                            if let Err(e) = self.on_idle_line(&line).await {
                                tracing::warn!(error = %e, "MCP channel failed");
                                peer_lost.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            }
        }

        rx.close();
        while let Ok(Outbound { reply, .. }) = rx.try_recv() {
            let _ = reply.send(Err(SessionError::Disconnected("session ended".into())));
        }
    }

    const fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn round_trip(
        &mut self,
        id: u64,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        self.send(&Request::new(id, method, params.as_ref())).await?;
        tracing::trace!(id, %method, "request sent");

        tokio::time::timeout(timeout, self.await_response(id, method))
            .await
            .map_err(|_| SessionError::Timeout(format!("{method} not answered within {timeout:?}")))?
    }

    async fn await_response(&mut self, id: u64, method: &str) -> Result<Value, SessionError> {
        loop {
            let Some(frame) = self.reader.next().await else {
                return Err(SessionError::Disconnected(format!(
                    "server closed its output while awaiting {method}"
                )));
            };
            let line = match frame? {
                Frame::Line(line) => line,
                Frame::Malformed(reason) => {
                    tracing::warn!(%reason, "skipping unreadable line");
                    continue;
                }
            };

            match Incoming::parse(&line) {
                Ok(Incoming::Response { id: got, outcome }) if got.as_u64() == Some(id) => {
                    return outcome.map_err(|e| {
                        SessionError::Protocol(format!("{method} rejected ({}): {}", e.code, e.message))
                    });
                }
                Ok(Incoming::Response { id: got, .. }) => {
                    tracing::warn!(%got, expected = id, "discarding response to unknown request");
                }
                Ok(other) => self.on_unsolicited(other).await?,
                Err(e) => tracing::debug!(error = %e, raw = %line, "skipping non JSON-RPC line"),
            }
        }
    }

    async fn cancel_request(&mut self, id: u64, method: &str) -> Result<(), SessionError> {
        tracing::debug!(id, %method, "caller stopped waiting, cancelling request");
        let params = json!({
            "requestId": id,
            "reason": format!("client stopped waiting for {method}"),
        });
        self.send(&Notification::new(METHOD_CANCELLED, Some(&params))).await
    }

    async fn on_idle_line(&mut self, line: &str) -> Result<(), SessionError> {
        match Incoming::parse(line) {
            Ok(Incoming::Response { id, .. }) => {
                tracing::warn!(%id, "discarding response with no pending request");
                Ok(())
            }
            Ok(other) => self.on_unsolicited(other).await,
            Err(e) => {
                tracing::debug!(error = %e, raw = %line, "skipping non JSON-RPC line");
                Ok(())
            }
        }
    }

    async fn on_unsolicited(&mut self, message: Incoming) -> Result<(), SessionError> {
        match message {
            Incoming::Notification { method, params } => {
                log_notification(&method, params.as_ref());
                Ok(())
            }
            Incoming::Request { id, method, .. } if method == METHOD_PING => {
                self.send(&Response::success(id, json!({}))).await
            }
            Incoming::Request { id, method, .. } => {
                tracing::debug!(%method, "rejecting server request");
                let error = RpcError {
                    code: METHOD_NOT_FOUND,
                    message: format!("method not supported by client: {method}"),
                    data: None,
                };
                self.send(&Response::failure(id, error)).await
            }
            Incoming::Response { .. } => Ok(()),
        }
    }

    async fn send<T: serde::Serialize>(&mut self, message: &T) -> Result<(), SessionError> {
        let line = serde_json::to_string(message)?;
        self.writer.send(line).await
    }
}

fn log_notification(method: &str, params: Option<&Value>) {
    if method != METHOD_LOG_MESSAGE {
        tracing::debug!(%method, ?params, "MCP notification");
        return;
    }
    let level = params
        .and_then(|p| p.get("level"))
        .and_then(Value::as_str)
        .unwrap_or("info");
    let data = params.and_then(|p| p.get("data")).cloned().unwrap_or(Value::Null);
    match level {
        "debug" => tracing::debug!(target: "mcp_agents::child", %data),
        "info" | "notice" => tracing::info!(target: "mcp_agents::child", %data),
        "warning" => tracing::warn!(target: "mcp_agents::child", %data),
        _ => tracing::error!(target: "mcp_agents::child", %data),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };

    use super::*;
    use crate::codec::MAX_LINE_BYTES;

    struct Peer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn recv(&mut self) -> Option<Value> {
            let line = self.lines.next_line().await.unwrap()?;
            Some(serde_json::from_str(&line).unwrap())
        }

        async fn send(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn accept_handshake(&mut self) {
            let init = self.recv().await.unwrap();
            assert_eq!(init["method"], "initialize");
            assert_eq!(init["params"]["protocolVersion"], PROTOCOL_VERSION);
            self.send(json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "1.0"}
                }
            }))
            .await;
            let initialized = self.recv().await.unwrap();
            assert_eq!(initialized["method"], METHOD_INITIALIZED);
        }
    }

    fn pair() -> (TransportIo, Peer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client);
        let (peer_reader, peer_writer) = tokio::io::split(server);
        (
            TransportIo::new(reader, writer),
            Peer {
                lines: BufReader::new(peer_reader).lines(),
                writer: peer_writer,
            },
        )
    }

    fn quick_config() -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_handshake_records_server_state() {
        let (io, mut peer) = pair();
        let peer_task = tokio::spawn(async move {
            peer.accept_handshake().await;
            peer
        });

        let session = ProtocolSession::open(io, &quick_config()).await.unwrap();
        assert_eq!(session.server().server_info.name, "fake");
        assert_eq!(session.protocol_version(), PROTOCOL_VERSION);
        assert!(!session.is_closed());

        let _peer = peer_task.await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (io, mut peer) = pair();
        tokio::spawn(async move {
            let init = peer.recv().await.unwrap();
            peer.send(json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "error": {"code": -32600, "message": "unsupported"}
            }))
            .await;
            peer
        });

        let err = ProtocolSession::open(io, &quick_config()).await.err().unwrap();
        assert!(matches!(err, SessionError::HandshakeFailure(msg) if msg.contains("unsupported")));
    }

    #[tokio::test]
    async fn test_handshake_peer_exits() {
        let (io, peer) = pair();
        drop(peer);
        let err = ProtocolSession::open(io, &quick_config()).await.err().unwrap();
        assert!(matches!(err, SessionError::HandshakeFailure(_)));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (io, peer) = pair();
        let config = SessionConfig {
            handshake_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let err = ProtocolSession::open(io, &config).await.err().unwrap();
        assert!(matches!(err, SessionError::Timeout(_)));
        drop(peer);
    }

    #[tokio::test]
    async fn test_noise_before_initialize_response_is_skipped() {
        let (io, mut peer) = pair();
        tokio::spawn(async move {
            let init = peer.recv().await.unwrap();
            peer.writer.write_all(b"starting server...\n").await.unwrap();
            peer.send(json!({"jsonrpc": "2.0", "method": "notifications/message",
                             "params": {"level": "info", "data": "booting"}}))
                .await;
            peer.send(json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {"name": "noisy", "version": "0"}
                }
            }))
            .await;
            let _ = peer.recv().await;
            peer
        });

        let session = ProtocolSession::open(io, &quick_config()).await.unwrap();
        assert_eq!(session.server().server_info.name, "noisy");
    }

    #[tokio::test]
    async fn test_unreadable_lines_do_not_end_session() {
        let (io, mut peer) = pair();
        tokio::spawn(async move {
            peer.accept_handshake().await;
            let request = peer.recv().await.unwrap();
            let mut oversized = vec![b'x'; MAX_LINE_BYTES + 10];
            oversized.push(b'\n');
            peer.writer.write_all(&oversized).await.unwrap();
            peer.writer.write_all(b"\xff\xfe not utf-8\n").await.unwrap();
            peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"tools": []}}))
                .await;

            // and again while no request is pending
            peer.writer.write_all(&oversized).await.unwrap();
            let request = peer.recv().await.unwrap();
            peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {}})).await;
            peer
        });

        let config = SessionConfig {
            request_timeout: Duration::from_secs(10),
            ..quick_config()
        };
        let session = ProtocolSession::open(io, &config).await.unwrap();
        let result = session.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        assert!(!session.is_closed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.is_closed());
        assert_eq!(session.request("tools/list", None).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_abandoned_request_is_cancelled_on_server() {
        let (io, mut peer) = pair();
        let peer_task = tokio::spawn(async move {
            peer.accept_handshake().await;
            let slow = peer.recv().await.unwrap();
            let cancelled = peer.recv().await.unwrap();
            assert_eq!(cancelled["method"], METHOD_CANCELLED);
            assert_eq!(cancelled["params"]["requestId"], slow["id"]);
            assert!(cancelled.get("id").is_none());

            // the answer to the cancelled request arrives late and is dropped
            peer.send(json!({"jsonrpc": "2.0", "id": slow["id"], "result": {"late": true}}))
                .await;
            let next = peer.recv().await.unwrap();
            assert_ne!(next["id"], slow["id"]);
            peer.send(json!({"jsonrpc": "2.0", "id": next["id"], "result": {"late": false}}))
                .await;
            peer
        });

        let session = ProtocolSession::open(io, &quick_config()).await.unwrap();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            session.request("tools/call", Some(json!({"name": "slow"}))),
        )
        .await;
        assert!(abandoned.is_err());

        let result = session.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"late": false}));
        assert!(!session.is_closed());
        let _peer = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_overlap() {
        let (io, mut peer) = pair();
        let overlaps = Arc::new(AtomicUsize::new(0));
        let seen_overlaps = Arc::clone(&overlaps);

        tokio::spawn(async move {
            peer.accept_handshake().await;
            let mut pending = peer.recv().await;
            while let Some(request) = pending.take() {
                // A well-behaved client sends nothing until this is answered.
                let early = tokio::time::timeout(Duration::from_millis(30), peer.recv()).await;
                if let Ok(Some(_)) = early {
                    seen_overlaps.fetch_add(1, Ordering::SeqCst);
                }
                peer.send(json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": {"echo": request["params"]["n"]}
                }))
                .await;
                pending = match early {
                    Ok(next) => next,
                    Err(_) => peer.recv().await,
                };
            }
        });

        let session = Arc::new(ProtocolSession::open(io, &quick_config()).await.unwrap());
        let calls = (0..4).map(|n| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("test/echo", Some(json!({"n": n}))).await })
        });
        let results = futures::future::join_all(calls).await;

        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap().unwrap(), json!({"echo": n}));
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_ping_answered_mid_request() {
        let (io, mut peer) = pair();
        tokio::spawn(async move {
            peer.accept_handshake().await;
            let request = peer.recv().await.unwrap();
            peer.send(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"})).await;
            let pong = peer.recv().await.unwrap();
            assert_eq!(pong["id"], "srv-1");
            assert_eq!(pong["result"], json!({}));

            peer.send(json!({"jsonrpc": "2.0", "id": "srv-2", "method": "roots/list"})).await;
            let rejected = peer.recv().await.unwrap();
            assert_eq!(rejected["error"]["code"], METHOD_NOT_FOUND);

            peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"ok": true}}))
                .await;
            peer
        });

        let session = ProtocolSession::open(io, &quick_config()).await.unwrap();
        let result = session.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_error_response_is_protocol_error_and_not_fatal() {
        let (io, mut peer) = pair();
        tokio::spawn(async move {
            peer.accept_handshake().await;
            let request = peer.recv().await.unwrap();
            peer.send(json!({"jsonrpc": "2.0", "id": request["id"],
                             "error": {"code": -32602, "message": "unknown tool"}}))
                .await;
            let request = peer.recv().await.unwrap();
            peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {}})).await;
            peer
        });

        let session = ProtocolSession::open(io, &quick_config()).await.unwrap();
        let err = session.request("tools/call", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol(msg) if msg.contains("unknown tool")));
        assert!(!session.is_closed());
        assert_eq!(session.request("tools/call", None).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_request_timeout_ends_session() {
        let (io, mut peer) = pair();
        let peer_task = tokio::spawn(async move {
            peer.accept_handshake().await;
            let _ignored = peer.recv().await;
            peer
        });

        let config = SessionConfig {
            request_timeout: Duration::from_millis(50),
            ..quick_config()
        };
        let session = ProtocolSession::open(io, &config).await.unwrap();
        let err = session.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));

        let _peer = peer_task.await.unwrap();
        let err = session.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Disconnected(_)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_peer_exit_is_disconnected() {
        let (io, mut peer) = pair();
        tokio::spawn(async move {
            peer.accept_handshake().await;
            let _request = peer.recv().await;
            drop(peer);
        });

        let session = ProtocolSession::open(io, &quick_config()).await.unwrap();
        let err = session.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Disconnected(_)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (io, mut peer) = pair();
        let peer_task = tokio::spawn(async move {
            peer.accept_handshake().await;
            // the dispatcher drops the writer on close
            assert!(peer.recv().await.is_none());
        });

        let session = ProtocolSession::open(io, &quick_config()).await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        peer_task.await.unwrap();

        let err = session.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
    }
}
