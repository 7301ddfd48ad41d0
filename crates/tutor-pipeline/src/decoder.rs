//! Decoder for chat-completions event streams.
//!
//! The upstream body is a sequence of `data:` frames, each carrying one JSON
//! chunk, closed by a `data: [DONE]` sentinel. Only non-empty
//! `choices[0].delta.content` values become [`StreamEvent::Content`]; role
//! announcements, reasoning deltas, finish markers, keep-alive comments and
//! unparsable frames are dropped.

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{EventStream, StreamEvent};

/// Sentinel payload that ends a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Message sent downstream when the upstream reports an error mid-stream.
/// The upstream detail is logged, never forwarded.
pub const UPSTREAM_ERROR_MESSAGE: &str = "The model service reported an error, please try again";

/// What a single `data:` payload means for the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text fragment to forward.
    Content(String),
    /// The terminator sentinel.
    Done,
    /// The upstream reported a failure.
    Error(String),
    /// Nothing to forward.
    Skip,
}

/// Classifies one `data:` payload.
///
/// # Examples
///
/// ```
/// use tutor_pipeline::decoder::{decode_frame, Frame};
///
/// let chunk = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
/// assert_eq!(decode_frame(chunk), Frame::Content("Hi".to_string()));
/// assert_eq!(decode_frame("[DONE]"), Frame::Done);
/// assert_eq!(decode_frame(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), Frame::Skip);
/// ```
#[must_use]
pub fn decode_frame(data: &str) -> Frame {
    let data = data.trim();
    if data.is_empty() {
        return Frame::Skip;
    }
    if data == DONE_SENTINEL {
        return Frame::Done;
    }

    let chunk: Value = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "Skipping unparsable stream frame");
            return Frame::Skip;
        }
    };

    if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .map_or_else(|| error.to_string(), str::to_string);
        return Frame::Error(message);
    }

    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map_or(Frame::Skip, |content| Frame::Content(content.to_string()))
}

/// Turns a raw byte stream into a stream of [`StreamEvent`]s.
///
/// The output always ends with exactly one terminal event. A transport error
/// becomes `Error`; an upstream that closes without the sentinel is treated
/// as complete.
pub fn decode_stream<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let events = async_stream::stream! {
        let mut frames = Box::pin(bytes.eventsource());

        while let Some(item) = frames.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Upstream stream interrupted");
                    yield StreamEvent::error("The model stream was interrupted");
                    return;
                }
            };

            match decode_frame(&event.data) {
                Frame::Content(fragment) => yield StreamEvent::Content(fragment),
                Frame::Done => {
                    yield StreamEvent::Done;
                    return;
                }
                Frame::Error(detail) => {
                    warn!(%detail, "Upstream reported an error mid-stream");
                    yield StreamEvent::error(UPSTREAM_ERROR_MESSAGE);
                    return;
                }
                Frame::Skip => {}
            }
        }

        debug!("Upstream closed without sentinel; treating as done");
        yield StreamEvent::Done;
    };

    Box::pin(events)
}
