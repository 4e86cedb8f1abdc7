//! Pull-based stream over a running query.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use mcp_agents_core::{EventItem, EventSink};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Events buffered between a producing runtime and the consumer.
pub const STREAM_CAPACITY: usize = 32;

/// Ordered, cancellable stream of [`QueryEvent`](mcp_agents_core::QueryEvent)s.
///
/// Ends after the `final` event or the first error. Dropping the bridge
/// cancels the query.
#[derive(Debug)]
pub struct StreamBridge {
    events: ReceiverStream<EventItem>,
    cancel: CancellationToken,
    _guard: DropGuard,
    done: bool,
}

impl StreamBridge {
    /// Create a bridge plus the sink its producer writes to.
    #[must_use]
    pub fn channel() -> (EventSink, Self) {
        let (sink, rx) = EventSink::channel(STREAM_CAPACITY);
        let cancel = sink.cancellation();
        let bridge = Self {
            events: ReceiverStream::new(rx),
            _guard: cancel.clone().drop_guard(),
            cancel,
            done: false,
        };
        (sink, bridge)
    }

    /// Stop the query. No further events are yielded.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
        self.done = true;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for StreamBridge {
    type Item = EventItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<EventItem>> {
        if self.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.events).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                if item.as_ref().map_or(true, |event| event.is_final()) {
                    self.done = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
