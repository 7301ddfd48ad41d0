//! Integration tests for streamed solutions.
//!
//! These tests relay a live upstream event stream through the HTTP gateway
//! and check ordering, error translation and that cancellation closes the
//! upstream connection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config_for, content_frame, eventually, spawn_upstream, Upstream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tutor_pipeline::decoder::UPSTREAM_ERROR_MESSAGE;
use tutor_pipeline::{
    extract_analysis, AnalysisRecord, HttpGateway, Orchestrator, RawInput, RelayOutcome,
    SseWriter, Stage, StreamEvent,
};

fn orchestrator_for(url: &str) -> Orchestrator {
    let config = config_for(url);
    let gateway = HttpGateway::new(&config).expect("Failed to build gateway");
    Orchestrator::new(Arc::new(gateway), &config)
}

fn analysis() -> AnalysisRecord {
    extract_analysis(common::ANALYSIS_JSON).expect("fixture analysis must parse")
}

/// Receives the next event, failing the test after five seconds.
async fn next_event(rx: &mut mpsc::Receiver<StreamEvent>) -> Option<StreamEvent> {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timeout waiting for event")
}

// ============================================================================
// Ordering Tests
// ============================================================================

/// Tests that fragments arrive in upstream order followed by one Done.
#[tokio::test]
async fn test_fragments_relayed_in_order() {
    let upstream = Upstream {
        frames: vec![content_frame("a"), content_frame("b"), content_frame("c")],
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream).await;

    let mut sink = Vec::new();
    let outcome = orchestrator_for(&url)
        .generate_streaming("2+2=?", &analysis(), &mut sink, &CancellationToken::new())
        .await
        .expect("stream should complete");

    assert_eq!(outcome, RelayOutcome::Completed);
    assert_eq!(
        sink,
        vec![
            StreamEvent::content("a"),
            StreamEvent::content("b"),
            StreamEvent::content("c"),
            StreamEvent::Done,
        ]
    );
}

/// Tests the full streaming pipeline for "2+2=?".
#[tokio::test]
async fn test_solve_streaming_end_to_end() {
    let upstream = Upstream {
        frames: vec![content_frame("The answer "), content_frame("is 4")],
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let (mut tx, mut rx) = mpsc::channel(1);
    let orchestrator = orchestrator_for(&url);
    let run = tokio::spawn(async move {
        orchestrator
            .solve_streaming(RawInput::text("2+2=?"), &mut tx, &CancellationToken::new())
            .await
    });

    let mut text = String::new();
    while let Some(event) = next_event(&mut rx).await {
        match event {
            StreamEvent::Content(fragment) => text.push_str(&fragment),
            StreamEvent::Done => break,
            StreamEvent::Error(message) => panic!("unexpected error event: {message}"),
        }
    }
    assert_eq!(text, "The answer is 4");

    let result = run.await.expect("task panicked");
    assert!(result.is_success());
    assert!(result.analysis.is_some());
    assert_eq!(result.solution, None);
    assert_eq!(upstream.calls(), 2);
}

/// Tests that streamed events can be written as SSE frames.
#[tokio::test]
async fn test_stream_written_as_sse_frames() {
    let upstream = Upstream {
        frames: vec![content_frame("x = 4")],
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream).await;

    let mut sink = SseWriter::new(Vec::new());
    orchestrator_for(&url)
        .generate_streaming("2+2=?", &analysis(), &mut sink, &CancellationToken::new())
        .await
        .expect("stream should complete");

    let written = String::from_utf8(sink.into_inner()).expect("utf-8 frames");
    assert_eq!(written, "data: {\"content\":\"x = 4\"}\n\ndata: [DONE]\n\n");
}

// ============================================================================
// Error Tests
// ============================================================================

/// Tests that an upstream error frame ends the stream with one redacted Error.
#[tokio::test]
async fn test_upstream_error_is_translated() {
    let upstream = Upstream {
        frames: vec![
            content_frame("a"),
            r#"{"error":{"message":"quota exceeded","code":"1113"}}"#.to_string(),
            content_frame("never"),
        ],
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream).await;

    let mut sink = Vec::new();
    let err = orchestrator_for(&url)
        .generate_streaming("2+2=?", &analysis(), &mut sink, &CancellationToken::new())
        .await
        .expect_err("stream should fail");

    assert_eq!(err.stage, Stage::Generation);
    assert_eq!(
        sink,
        vec![
            StreamEvent::content("a"),
            StreamEvent::error(UPSTREAM_ERROR_MESSAGE),
        ]
    );
}

/// Tests that an upstream that goes silent mid-stream times out.
#[tokio::test]
async fn test_stalled_upstream_times_out() {
    let upstream = Upstream {
        frames: vec![content_frame("a")],
        stream_stalls: true,
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let mut config = config_for(&url);
    config.request_timeout_secs = 1;
    let gateway = HttpGateway::new(&config).expect("Failed to build gateway");
    let orchestrator = Orchestrator::new(Arc::new(gateway), &config);

    let mut sink = Vec::new();
    let err = timeout(
        Duration::from_secs(5),
        orchestrator.generate_streaming("2+2=?", &analysis(), &mut sink, &CancellationToken::new()),
    )
    .await
    .expect("stalled stream was not bounded")
    .expect_err("stalled stream should fail");

    assert_eq!(err.stage, Stage::Generation);
    assert_eq!(sink.len(), 2);
    assert_eq!(sink[0], StreamEvent::content("a"));
    assert!(
        matches!(&sink[1], StreamEvent::Error(message) if message.contains("timed out")),
        "got: {:?}",
        sink[1]
    );
    assert_eq!(upstream.calls(), 1);
}

/// Tests that a failed analysis produces a single Error and no generation call.
#[tokio::test]
async fn test_early_failure_sends_single_error() {
    let upstream = Upstream {
        analysis: "no json".to_string(),
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let mut sink = Vec::new();
    let result = orchestrator_for(&url)
        .solve_streaming(RawInput::text("2+2=?"), &mut sink, &CancellationToken::new())
        .await;

    assert_eq!(result.error.expect("expected failure").stage, Stage::Analysis);
    assert_eq!(sink.len(), 1);
    assert!(matches!(sink[0], StreamEvent::Error(_)));
    assert_eq!(upstream.calls(), 1);
}

// ============================================================================
// Cancellation Tests
// ============================================================================

/// Tests that cancelling the relay stops delivery and closes the upstream.
#[tokio::test]
async fn test_cancellation_closes_upstream() {
    let upstream = Upstream {
        frames: vec![content_frame("a")],
        stream_forever: true,
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let cancel = CancellationToken::new();
    let (mut tx, mut rx) = mpsc::channel(1);
    let orchestrator = orchestrator_for(&url);
    let token = cancel.clone();
    let relay = tokio::spawn(async move {
        orchestrator
            .generate_streaming("2+2=?", &analysis(), &mut tx, &token)
            .await
    });

    assert_eq!(next_event(&mut rx).await, Some(StreamEvent::content("a")));
    assert_eq!(next_event(&mut rx).await, Some(StreamEvent::content("tick")));
    cancel.cancel();

    let outcome = timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay did not stop")
        .expect("task panicked")
        .expect("cancellation is not a failure");
    assert_eq!(outcome, RelayOutcome::Cancelled);

    // At most the one event already buffered before cancel, then closed.
    let mut after_cancel = 0;
    while let Some(event) = next_event(&mut rx).await {
        assert!(!event.is_terminal(), "no terminal event after cancel");
        after_cancel += 1;
    }
    assert!(after_cancel <= 1);

    assert!(
        eventually(|| upstream.stream_closed()).await,
        "upstream stream was not closed"
    );
}

/// Tests that a disconnected consumer also closes the upstream.
#[tokio::test]
async fn test_consumer_disconnect_closes_upstream() {
    let upstream = Upstream {
        frames: vec![content_frame("a")],
        stream_forever: true,
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let (mut tx, mut rx) = mpsc::channel(1);
    let orchestrator = orchestrator_for(&url);
    let relay = tokio::spawn(async move {
        orchestrator
            .generate_streaming("2+2=?", &analysis(), &mut tx, &CancellationToken::new())
            .await
    });

    assert_eq!(next_event(&mut rx).await, Some(StreamEvent::content("a")));
    drop(rx);

    let outcome = timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay did not stop")
        .expect("task panicked")
        .expect("disconnect is not a failure");
    assert_eq!(outcome, RelayOutcome::Cancelled);
    assert!(
        eventually(|| upstream.stream_closed()).await,
        "upstream stream was not closed"
    );
}
