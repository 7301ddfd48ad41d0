//! Events carried by a streaming generation.
//!
//! A stream is a sequence of [`StreamEvent::Content`] fragments closed by
//! exactly one terminal event, [`StreamEvent::Done`] or
//! [`StreamEvent::Error`]. Nothing follows the terminal event.
//!
//! # Example
//!
//! ```
//! use tutor_pipeline::StreamEvent;
//!
//! let event = StreamEvent::content("x = 4");
//! assert_eq!(
//!     serde_json::to_string(&event).unwrap(),
//!     r#"{"event":"content","payload":"x = 4"}"#
//! );
//! assert!(StreamEvent::Done.is_terminal());
//! ```

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A lazily produced, single-consumer sequence of stream events.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// One event of a streaming generation.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of generated text, in upstream order.
    Content(String),
    /// The stream completed normally.
    Done,
    /// The stream failed; the message is safe to show to end users.
    Error(String),
}

impl StreamEvent {
    /// Creates a `Content` event.
    #[must_use]
    pub fn content(fragment: impl Into<String>) -> Self {
        Self::Content(fragment.into())
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Returns `true` for `Done` and `Error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Content(_) => "content",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }

    /// Encodes the event as a server-sent-events frame.
    ///
    /// Content and errors become `data: {"content": ...}` and
    /// `data: {"error": ...}`; completion is the `data: [DONE]` sentinel.
    #[must_use]
    pub fn to_sse_frame(&self) -> String {
        let data = match self {
            Self::Content(fragment) => serde_json::json!({ "content": fragment }).to_string(),
            Self::Done => "[DONE]".to_string(),
            Self::Error(message) => serde_json::json!({ "error": message }).to_string(),
        };
        format!("data: {data}\n\n")
    }
}
