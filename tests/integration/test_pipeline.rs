//! End-to-end tests for the synchronous pipeline.
//!
//! These tests drive the orchestrator through the HTTP gateway against a
//! mock chat-completions upstream served by axum.

mod common;

use std::sync::Arc;

use common::{config_for, spawn_upstream, Upstream};
use tutor_pipeline::{
    Category, Difficulty, HistoryStore, HttpGateway, Identity, ImageFormat, ImagePayload,
    InMemoryHistory, Orchestrator, RawInput, Stage,
};

fn orchestrator_for(url: &str) -> Orchestrator {
    let config = config_for(url);
    let gateway = HttpGateway::new(&config).expect("Failed to build gateway");
    Orchestrator::new(Arc::new(gateway), &config)
}

// ============================================================================
// Full Pipeline Tests
// ============================================================================

/// Tests the typed "2+2=?" problem end to end.
#[tokio::test]
async fn test_text_problem_is_solved() {
    let upstream = Upstream::default();
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let result = orchestrator_for(&url)
        .solve(RawInput::text("2+2=?"), None)
        .await;

    assert!(result.is_success(), "unexpected failure: {:?}", result.error);
    assert_eq!(result.recognized_text.as_deref(), Some("2+2=?"));

    let analysis = result.analysis.expect("analysis missing");
    assert_eq!(analysis.category, Category::FillIn);
    assert_eq!(analysis.subject, "math");
    assert_eq!(analysis.topics, vec!["arithmetic"]);
    assert_eq!(analysis.difficulty, Difficulty::Easy);

    let solution = result.solution.expect("solution missing");
    assert_eq!(solution.reasoning, "Add the two numbers.");
    assert_eq!(solution.steps, vec!["Add 2 and 2"]);
    assert_eq!(solution.final_answer, "4");
    assert_eq!(solution.summary, "Single-digit addition.");

    assert_eq!(upstream.calls(), 2, "text input must skip recognition");
}

/// Tests that an image problem is transcribed before analysis.
#[tokio::test]
async fn test_image_problem_is_recognized_then_solved() {
    let upstream = Upstream::default();
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let image = ImagePayload::parse("data:image/png;base64,iVBORw0KGgo=").expect("valid image");
    assert_eq!(image.format(), ImageFormat::Png);

    let result = orchestrator_for(&url)
        .solve(RawInput::Image(image), None)
        .await;

    assert!(result.is_success(), "unexpected failure: {:?}", result.error);
    assert_eq!(result.recognized_text.as_deref(), Some("2+2=?"));
    assert_eq!(result.solution.expect("solution missing").final_answer, "4");
    assert_eq!(upstream.calls(), 3);
}

// ============================================================================
// Failure Tests
// ============================================================================

/// Tests that an oversized image is rejected before any upstream call.
#[tokio::test]
async fn test_oversized_image_never_reaches_upstream() {
    let upstream = Upstream::default();
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let mut config = config_for(&url);
    config.max_image_bytes = 8;
    let gateway = HttpGateway::new(&config).expect("Failed to build gateway");
    let orchestrator = Orchestrator::new(Arc::new(gateway), &config);

    let image = ImagePayload::from_bytes(vec![0u8; 16], Some(ImageFormat::Jpeg)).expect("image");
    let result = orchestrator.solve(RawInput::Image(image), None).await;

    let error = result.error.expect("expected a failure");
    assert_eq!(error.stage, Stage::Recognition);
    assert!(error.message.contains("too large"));
    assert_eq!(result.recognized_text, None);
    assert_eq!(upstream.calls(), 0);
}

/// Tests that an unparsable analysis keeps the recognized text.
#[tokio::test]
async fn test_analysis_failure_keeps_partial_result() {
    let upstream = Upstream {
        analysis: "Sorry, I can only chat about the weather.".to_string(),
        ..Upstream::default()
    };
    let (url, _handle) = spawn_upstream(upstream.clone()).await;

    let result = orchestrator_for(&url)
        .solve(RawInput::text("2+2=?"), None)
        .await;

    let error = result.error.expect("expected a failure");
    assert_eq!(error.stage, Stage::Analysis);
    assert_eq!(result.recognized_text.as_deref(), Some("2+2=?"));
    assert_eq!(result.analysis, None);
    assert_eq!(result.solution, None);
    assert_eq!(upstream.calls(), 1, "generation must not run after a failed analysis");
}

/// Tests that an unreachable upstream yields a user-safe analysis failure.
#[tokio::test]
async fn test_unreachable_upstream_is_reported() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);

    let result = orchestrator_for(&format!("http://{addr}/v1/chat/completions"))
        .solve(RawInput::text("2+2=?"), None)
        .await;

    let error = result.error.expect("expected a failure");
    assert_eq!(error.stage, Stage::Analysis);
    assert!(error.message.contains("unavailable"), "got: {}", error.message);
    assert!(!error.message.contains(&addr.to_string()));
}

// ============================================================================
// History Tests
// ============================================================================

/// Tests that an identified solved run is recorded exactly once.
#[tokio::test]
async fn test_history_recorded_once_for_identified_run() {
    let upstream = Upstream::default();
    let (url, _handle) = spawn_upstream(upstream).await;

    let history = Arc::new(InMemoryHistory::new());
    let orchestrator =
        orchestrator_for(&url).with_history(Arc::clone(&history) as Arc<dyn HistoryStore>);

    let identity = Identity::new("student-7", "Lin");
    let result = orchestrator
        .solve(RawInput::text("2+2=?"), Some(&identity))
        .await;
    orchestrator.solve(RawInput::text("3+3=?"), None).await;

    assert_eq!(history.len().await, 1);
    let records = history.list_for_actor("student-7").await;
    assert_eq!(records.len(), 1);
    assert_eq!(result.history_id.as_deref(), Some(records[0].id.as_str()));
    assert_eq!(records[0].actor_name, "Lin");
    assert_eq!(records[0].question_text, "2+2=?");
    assert_eq!(records[0].solution.final_answer, "4");
}

// ============================================================================
// Concurrency Tests
// ============================================================================

/// Tests that one orchestrator serves concurrent runs independently.
#[tokio::test]
async fn test_concurrent_runs_share_one_orchestrator() {
    let upstream = Upstream::default();
    let (url, _handle) = spawn_upstream(upstream.clone()).await;
    let orchestrator = orchestrator_for(&url);

    let runs: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .solve(RawInput::text(format!("{i}+{i}=?")), None)
                    .await
            })
        })
        .collect();

    for (i, run) in runs.into_iter().enumerate() {
        let result = run.await.expect("task panicked");
        assert!(result.is_success());
        assert_eq!(result.recognized_text, Some(format!("{i}+{i}=?")));
    }
    assert_eq!(upstream.calls(), 8);
}
