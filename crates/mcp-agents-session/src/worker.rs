//! Serial query execution.
//!
//! The worker is the only owner of the conversation context. Jobs run one at
//! a time in the order they were submitted.

use std::sync::Arc;

use mcp_agents_core::{
    AgentRuntime, ChatMessage, ConversationContext, EventSink, ProtocolChannel, QueryEvent,
    SessionError,
};
use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::state::StateCell;

pub(crate) enum Job {
    Invoke {
        message: ChatMessage,
        reply: oneshot::Sender<Result<Value, SessionError>>,
    },
    Stream {
        message: ChatMessage,
        sink: EventSink,
    },
}

/// Handle to the query worker task.
pub(crate) struct QueryWorker {
    jobs: mpsc::UnboundedSender<Job>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QueryWorker {
    pub(crate) fn spawn(
        runtime: Arc<dyn AgentRuntime>,
        context: ConversationContext,
        channel: Arc<dyn ProtocolChannel>,
        state: StateCell,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let worker = Worker {
            runtime,
            context,
            channel,
            state,
            stop: stop.clone(),
        };
        Self {
            jobs,
            stop,
            task: Mutex::new(Some(tokio::spawn(worker.run(rx)))),
        }
    }

    /// Queue a job behind every job submitted before it.
    pub(crate) fn submit(&self, job: Job) -> Result<(), SessionError> {
        self.jobs.send(job).map_err(|_| SessionError::NotConnected)
    }

    /// Abort the running job, fail the queued ones and wait for the task.
    pub(crate) async fn stop(&self) -> Result<(), SessionError> {
        self.stop.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        task.await
            .map_err(|e| SessionError::Runtime(format!("query worker panicked: {e}")))
    }
}

struct Worker {
    runtime: Arc<dyn AgentRuntime>,
    context: ConversationContext,
    channel: Arc<dyn ProtocolChannel>,
    state: StateCell,
    stop: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        loop {
            let job = tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            match job {
                Job::Invoke { message, reply } => self.invoke(message, reply).await,
                Job::Stream { message, sink } => self.stream(message, sink).await,
            }
        }

        jobs.close();
        while let Ok(job) = jobs.try_recv() {
            match job {
                Job::Invoke { reply, .. } => {
                    let _ = reply.send(Err(SessionError::NotConnected));
                }
                Job::Stream { sink, .. } => {
                    let _ = sink.try_fail(SessionError::NotConnected);
                }
            }
        }
        tracing::debug!(thread_id = %self.context.thread_id, "query worker stopped");
    }

    async fn invoke(
        &mut self,
        message: ChatMessage,
        mut reply: oneshot::Sender<Result<Value, SessionError>>,
    ) {
        let snapshot = self.context.clone();
        let result = tokio::select! {
            biased;
            () = self.stop.cancelled() => Err(SessionError::NotConnected),
            () = reply.closed() => Err(SessionError::Cancelled),
            result = self.runtime.invoke(&mut self.context, message) => result,
        };
        self.settle(snapshot, result.as_ref().err());
        let _ = reply.send(result);
    }

    async fn stream(&mut self, message: ChatMessage, sink: EventSink) {
        let snapshot = self.context.clone();
        let cancel = sink.cancellation();
        let result = tokio::select! {
            biased;
            () = self.stop.cancelled() => Err(SessionError::NotConnected),
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.runtime.stream(&mut self.context, message, sink.clone()) => result,
        };

        // A consumer that holds the stream without reading it must not keep
        // the worker from stopping.
        let result = match result {
            Ok(value) => tokio::select! {
                biased;
                () = self.stop.cancelled() => Err(SessionError::NotConnected),
                emitted = sink.emit(QueryEvent::Final { result: value }) => emitted,
            },
            Err(e) => Err(e),
        };
        self.settle(snapshot, result.as_ref().err());
        if let Err(e) = result {
            if self.stop.is_cancelled() {
                let _ = sink.try_fail(e);
            } else {
                tokio::select! {
                    biased;
                    () = self.stop.cancelled() => {}
                    () = sink.fail(e) => {}
                }
            }
        }
    }

    /// Restore the snapshot on failure and fail the session on fatal errors.
    fn settle(&mut self, snapshot: ConversationContext, error: Option<&SessionError>) {
        if let Some(e) = error {
            self.context = snapshot;
            match e {
                SessionError::Cancelled => tracing::debug!("query cancelled by consumer"),
                e => tracing::warn!(error = %e, "query failed"),
            }
        }
        let fatal = error.is_some_and(SessionError::is_fatal);
        if fatal || self.channel.is_closed() {
            self.state.fail_if_ready();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use mcp_agents_core::SessionState;
    use serde_json::json;

    use super::*;

    struct OpenChannel(AtomicBool);

    #[async_trait]
    impl ProtocolChannel for OpenChannel {
        async fn request(&self, _: &str, _: Option<Value>) -> Result<Value, SessionError> {
            Ok(Value::Null)
        }
        async fn close(&self) -> Result<(), SessionError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn is_closed(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Appends the message, then fails if it says so.
    struct Scripted;

    #[async_trait]
    impl AgentRuntime for Scripted {
        async fn invoke(
            &self,
            ctx: &mut ConversationContext,
            message: ChatMessage,
        ) -> Result<Value, SessionError> {
            let text = message.content.clone();
            ctx.extend([message]);
            match text.as_str() {
                "fail" => Err(SessionError::Runtime("scripted".into())),
                "drop" => Err(SessionError::Disconnected("peer gone".into())),
                _ => Ok(json!({ "content": text, "turns": ctx.messages.len() })),
            }
        }

        async fn stream(
            &self,
            ctx: &mut ConversationContext,
            message: ChatMessage,
            events: EventSink,
        ) -> Result<Value, SessionError> {
            events
                .emit(QueryEvent::ContentDelta {
                    text: message.content.clone(),
                })
                .await?;
            self.invoke(ctx, message).await
        }
    }

    fn worker() -> (QueryWorker, StateCell) {
        let state = StateCell::new();
        state.set(SessionState::Ready);
        let worker = QueryWorker::spawn(
            Arc::new(Scripted),
            ConversationContext::with_thread_id("t"),
            Arc::new(OpenChannel(AtomicBool::new(false))),
            state.clone(),
        );
        (worker, state)
    }

    async fn ask(worker: &QueryWorker, text: &str) -> Result<Value, SessionError> {
        let (reply, rx) = oneshot::channel();
        worker
            .submit(Job::Invoke {
                message: ChatMessage::user(text),
                reply,
            })
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_runtime_failure_restores_context() {
        let (worker, state) = worker();
        assert_eq!(ask(&worker, "hi").await.unwrap(), json!({"content": "hi", "turns": 1}));
        assert!(matches!(
            ask(&worker, "fail").await,
            Err(SessionError::Runtime(_))
        ));
        assert_eq!(state.get(), SessionState::Ready);

        // the failed turn was rolled back
        let again = ask(&worker, "again").await.unwrap();
        assert_eq!(again["turns"], 2);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_fails_session() {
        let (worker, state) = worker();
        assert!(matches!(
            ask(&worker, "drop").await,
            Err(SessionError::Disconnected(_))
        ));
        assert_eq!(state.get(), SessionState::Failed);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_emits_final_last() {
        let (worker, _state) = worker();
        let (sink, mut rx) = EventSink::channel(4);
        worker
            .submit(Job::Stream {
                message: ChatMessage::user("hello"),
                sink,
            })
            .unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first, QueryEvent::ContentDelta { text: "hello".into() });
        let last = rx.recv().await.unwrap().unwrap();
        assert_eq!(last, QueryEvent::Final { result: json!({"content": "hello", "turns": 1}) });
        assert!(rx.recv().await.is_none());
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_with_unread_stream_does_not_hang() {
        let (worker, _state) = worker();
        // room for the delta only, so the final event can never be sent
        let (sink, rx) = EventSink::channel(1);
        worker
            .submit(Job::Stream {
                message: ChatMessage::user("hello"),
                sink,
            })
            .unwrap();
        let (queued, queued_rx) = EventSink::channel(1);
        worker
            .submit(Job::Stream {
                message: ChatMessage::user("queued"),
                sink: queued,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(5), worker.stop())
            .await
            .expect("stop must not wait for the consumer")
            .unwrap();
        drop((rx, queued_rx));
    }

    #[tokio::test]
    async fn test_stop_fails_queued_jobs() {
        let (worker, _state) = worker();
        worker.stop().await.unwrap();
        worker.stop().await.unwrap();

        let (reply, rx) = oneshot::channel();
        let submitted = worker.submit(Job::Invoke {
            message: ChatMessage::user("late"),
            reply,
        });
        assert!(matches!(submitted, Err(SessionError::NotConnected)));
        assert!(rx.await.is_err());
    }
}
