//! Relay from a live model stream to a downstream consumer.
//!
//! The relay pulls one upstream event, hands it to the [`EventSink`], and
//! only then pulls the next, so at most one fragment is in flight. It stops
//! on the first terminal event, on cancellation, or when the consumer goes
//! away; in every case the upstream stream is dropped on return, which
//! closes the upstream connection.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::{EventStream, StreamEvent};

/// The consumer has stopped accepting events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event consumer disconnected")]
pub struct SinkClosed;

/// Destination for relayed events.
///
/// `send` may wait; that wait is the relay's backpressure.
#[async_trait]
pub trait EventSink: Send {
    /// Delivers one event, in order.
    async fn send(&mut self, event: StreamEvent) -> Result<(), SinkClosed>;
}

#[async_trait]
impl EventSink for mpsc::Sender<StreamEvent> {
    async fn send(&mut self, event: StreamEvent) -> Result<(), SinkClosed> {
        mpsc::Sender::send(self, event).await.map_err(|_| SinkClosed)
    }
}

#[async_trait]
impl EventSink for Vec<StreamEvent> {
    async fn send(&mut self, event: StreamEvent) -> Result<(), SinkClosed> {
        self.push(event);
        Ok(())
    }
}

/// Writes events as server-sent-events frames.
#[derive(Debug)]
pub struct SseWriter<W> {
    writer: W,
}

impl<W> SseWriter<W> {
    /// Wraps an async writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> EventSink for SseWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, event: StreamEvent) -> Result<(), SinkClosed> {
        let frame = event.to_sse_frame();
        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|_| SinkClosed)?;
        self.writer.flush().await.map_err(|_| SinkClosed)
    }
}

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// `Done` was delivered.
    Completed,
    /// `Error` was delivered with this message.
    Failed(String),
    /// Stopped early by the token or by a closed sink.
    Cancelled,
}

/// Forwards `upstream` into `sink` until a terminal event or cancellation.
///
/// Every `Content` is forwarded untouched and in order. The first `Done` or
/// `Error` is forwarded and ends the relay; an upstream that ends without
/// one yields a `Done`. After cancellation nothing more is sent.
pub async fn relay<S>(
    mut upstream: EventStream,
    sink: &mut S,
    cancel: &CancellationToken,
) -> RelayOutcome
where
    S: EventSink + ?Sized,
{
    let mut forwarded = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(forwarded, "Relay cancelled");
                return RelayOutcome::Cancelled;
            }
            next = upstream.next() => next,
        };

        let event = next.unwrap_or(StreamEvent::Done);
        let outcome = match &event {
            StreamEvent::Content(_) => None,
            StreamEvent::Done => Some(RelayOutcome::Completed),
            StreamEvent::Error(message) => Some(RelayOutcome::Failed(message.clone())),
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(forwarded, "Relay cancelled");
                return RelayOutcome::Cancelled;
            }
            sent = sink.send(event) => sent,
        };
        if sent.is_err() {
            debug!(forwarded, "Consumer disconnected, closing upstream");
            return RelayOutcome::Cancelled;
        }
        forwarded += 1;

        if let Some(outcome) = outcome {
            debug!(forwarded, ?outcome, "Relay finished");
            return outcome;
        }
    }
}
