//! Mock chat-completions upstream shared by the integration tests.
//!
//! Answers synchronous calls by stage (vision requests get the recognized
//! text, requests carrying the analysis instruction get the analysis reply,
//! everything else gets the solution) and streaming calls with scripted
//! `data:` frames.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use serde_json::{json, Value};
use tutor_pipeline::prompts::ANALYSIS_SYSTEM;
use tutor_pipeline::Config;

/// Route served by the mock upstream.
pub const ROUTE: &str = "/v1/chat/completions";

/// Analysis reply for "2+2=?".
pub const ANALYSIS_JSON: &str = r#"```json
{"category": "fill-in", "subject": "math", "topics": ["arithmetic"], "difficulty": "easy", "prerequisites": ["counting"]}
```"#;

/// Solution reply for "2+2=?".
pub const SOLUTION_TEXT: &str = "[Reasoning]\nAdd the two numbers.\n\n[Steps]\n1. Add 2 and 2\n\n[Answer]\n4\n\n[Summary]\nSingle-digit addition.";

/// Scripted behavior of the mock upstream.
#[derive(Clone)]
pub struct Upstream {
    /// Reply to vision requests.
    pub recognition: String,
    /// Reply to analysis requests.
    pub analysis: String,
    /// Reply to generation requests.
    pub solution: String,
    /// Raw `data:` payloads of a streamed reply, before `[DONE]`.
    pub frames: Vec<String>,
    /// Keep streaming ticks until the client goes away.
    pub stream_forever: bool,
    /// Go silent after the scripted frames without closing the body.
    pub stream_stalls: bool,
    /// Number of requests received.
    pub calls: Arc<AtomicUsize>,
    /// Set once a streamed body has been dropped by the server.
    pub stream_closed: Arc<AtomicBool>,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            recognition: "2+2=?".to_string(),
            analysis: ANALYSIS_JSON.to_string(),
            solution: SOLUTION_TEXT.to_string(),
            frames: Vec::new(),
            stream_forever: false,
            stream_stalls: false,
            calls: Arc::new(AtomicUsize::new(0)),
            stream_closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Upstream {
    /// Returns the number of requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns `true` once a streamed body was dropped.
    pub fn stream_closed(&self) -> bool {
        self.stream_closed.load(Ordering::SeqCst)
    }
}

/// A chat-completions chunk carrying one content delta.
pub fn content_frame(fragment: &str) -> String {
    json!({ "choices": [{ "index": 0, "delta": { "content": fragment } }] }).to_string()
}

/// Sets its flag when dropped.
struct CloseFlag(Arc<AtomicBool>);

impl Drop for CloseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn chat_completions(State(upstream): State<Upstream>, Json(body): Json<Value>) -> Response {
    upstream.calls.fetch_add(1, Ordering::SeqCst);

    if body["stream"] == true {
        return streamed_reply(&upstream).into_response();
    }

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let is_vision = messages.iter().any(|m| m["content"].is_array());
    let is_analysis = messages
        .iter()
        .any(|m| m["role"] == "system" && m["content"] == ANALYSIS_SYSTEM);

    let content = if is_vision {
        &upstream.recognition
    } else if is_analysis {
        &upstream.analysis
    } else {
        &upstream.solution
    };
    Json(json!({
        "id": "chatcmpl-test",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    }))
    .into_response()
}

fn streamed_reply(upstream: &Upstream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = upstream.frames.clone();
    let forever = upstream.stream_forever;
    let stalls = upstream.stream_stalls;
    let flag = CloseFlag(Arc::clone(&upstream.stream_closed));

    Sse::new(async_stream::stream! {
        let _flag = flag;
        yield Ok(Event::default().data(json!({ "choices": [{ "delta": { "role": "assistant" } }] }).to_string()));
        for frame in frames {
            yield Ok(Event::default().data(frame));
        }
        if stalls {
            futures::future::pending::<()>().await;
        }
        if forever {
            loop {
                tokio::time::sleep(Duration::from_millis(20)).await;
                yield Ok(Event::default().data(content_frame("tick")));
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    })
}

/// Spawns the mock upstream and returns its chat-completions URL.
pub async fn spawn_upstream(upstream: Upstream) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let router = Router::new()
        .route(ROUTE, post(chat_completions))
        .with_state(upstream);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    (format!("http://{addr}{ROUTE}"), handle)
}

/// Configuration pointing both endpoints at `url`.
pub fn config_for(url: &str) -> Config {
    let mut config = Config::default();
    config.vision.api_url = url.to_string();
    config.text.api_url = url.to_string();
    config.text.api_key = Some("test-key".to_string());
    config.request_timeout_secs = 5;
    config
}

/// Waits until `condition` holds, for at most five seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
