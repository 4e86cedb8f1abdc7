//! Incremental query events and the sink runtimes emit them through.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::SessionError;

/// One incremental unit of agent output during a streaming query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    /// Partial assistant text.
    ContentDelta { text: String },
    /// The agent decided to call a tool.
    ToolInvocation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        args: Value,
    },
    /// A tool call finished.
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Aggregated result; always the last event of a successful stream.
    Final { result: Value },
}

impl QueryEvent {
    /// Whether this is the terminal event.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// Item carried from a producing runtime to a stream consumer.
pub type EventItem = Result<QueryEvent, SessionError>;

/// Producer half of a streaming query.
///
/// Sends block while the consumer is behind (the channel is bounded) and fail
/// with [`SessionError::Cancelled`] once the consumer has gone away.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EventItem>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Create a sink plus the receiver its events arrive on.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Emit an event, waiting for room in the channel.
    ///
    /// # Errors
    /// Returns [`SessionError::Cancelled`] if the consumer cancelled or hung up.
    pub async fn emit(&self, event: QueryEvent) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            sent = self.tx.send(Ok(event)) => sent.map_err(|_| SessionError::Cancelled),
        }
    }

    /// Deliver a terminal error to the consumer, if it is still listening.
    ///
    /// Waits for room like [`emit`](Self::emit), and gives up on cancel.
    pub async fn fail(&self, err: SessionError) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            _ = self.tx.send(Err(err)) => {}
        }
    }

    /// Deliver a terminal error only if the channel has room right now.
    ///
    /// Returns whether the error was queued.
    #[must_use]
    pub fn try_fail(&self, err: SessionError) -> bool {
        !self.cancel.is_cancelled() && self.tx.try_send(Err(err)).is_ok()
    }

    /// Whether the consumer has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the consumer cancels.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Token shared with the consumer side.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_preserves_order() {
        let (sink, mut rx) = EventSink::channel(4);
        for i in 0..3 {
            sink.emit(QueryEvent::ContentDelta {
                text: i.to_string(),
            })
            .await
            .unwrap();
        }
        drop(sink);

        let mut seen = Vec::new();
        while let Some(Ok(QueryEvent::ContentDelta { text })) = rx.recv().await {
            seen.push(text);
        }
        assert_eq!(seen, ["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_emit_after_cancel_fails() {
        let (sink, _rx) = EventSink::channel(1);
        sink.cancellation().cancel();
        let err = sink
            .emit(QueryEvent::ContentDelta { text: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_full_channel() {
        let (sink, _rx) = EventSink::channel(1);
        sink.emit(QueryEvent::ContentDelta { text: "a".into() })
            .await
            .unwrap();

        let token = sink.cancellation();
        let blocked = tokio::spawn(async move {
            sink.emit(QueryEvent::ContentDelta { text: "b".into() })
                .await
        });
        token.cancel();
        assert!(matches!(blocked.await.unwrap(), Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_try_fail_never_waits_for_room() {
        let (sink, mut rx) = EventSink::channel(1);
        sink.emit(QueryEvent::ContentDelta { text: "a".into() })
            .await
            .unwrap();
        assert!(!sink.try_fail(SessionError::NotConnected));

        assert!(rx.recv().await.unwrap().is_ok());
        assert!(sink.try_fail(SessionError::NotConnected));
        assert!(matches!(rx.recv().await, Some(Err(SessionError::NotConnected))));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = QueryEvent::ToolInvocation {
            id: None,
            name: "echo".into(),
            args: serde_json::json!({"text": "hi"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_invocation");
        assert!(json.get("id").is_none());
    }
}
