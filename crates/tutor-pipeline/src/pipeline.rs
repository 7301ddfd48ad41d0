//! Stage orchestration.
//!
//! A run moves through [`PipelineStatus`]:
//!
//! - `Start` -> `Recognized`: image input is transcribed by the vision model;
//!   text input is taken verbatim.
//! - `Recognized` -> `Analyzed`: the text model classifies the problem.
//! - `Analyzed` -> `Solved`: the text model writes the solution, either as a
//!   whole or as a relayed stream.
//!
//! Any stage may end the run in `Failed`; everything produced before the
//! failing stage stays in the [`PipelineResult`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{GatewayError, PipelineError, Result, Stage, TutorError};
use crate::event::{EventStream, StreamEvent};
use crate::extract::{extract_analysis, extract_solution};
use crate::gateway::{ModelGateway, ModelRequest};
use crate::history::{HistoryStore, Identity, NewHistoryRecord};
use crate::input::{ImagePayload, RawInput};
use crate::prompts::{
    analysis_prompt, generation_prompt, ANALYSIS_PARAMS, ANALYSIS_SYSTEM, GENERATION_PARAMS,
    GENERATION_SYSTEM, RECOGNITION_INSTRUCTION, RECOGNITION_PARAMS, STREAMING_GENERATION_PARAMS,
};
use crate::records::{AnalysisRecord, ErrorInfo, PipelineResult, PipelineStatus, SolutionRecord};
use crate::relay::{relay, EventSink, RelayOutcome};

/// Message recorded when a run is cancelled by its caller.
const CANCELLED_MESSAGE: &str = "The request was cancelled";

// ============================================================================
// PipelineRun
// ============================================================================

/// State of one run: its status and the outputs gathered so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineRun {
    status: PipelineStatus,
    result: PipelineResult,
}

impl PipelineRun {
    /// Creates a run in `Start`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Returns the outputs gathered so far.
    #[must_use]
    pub const fn result(&self) -> &PipelineResult {
        &self.result
    }

    /// Returns the stage that would run next, if the run is not terminal.
    #[must_use]
    pub const fn pending_stage(&self) -> Option<Stage> {
        match self.status {
            PipelineStatus::Start => Some(Stage::Recognition),
            PipelineStatus::Recognized => Some(Stage::Analysis),
            PipelineStatus::Analyzed => Some(Stage::Generation),
            PipelineStatus::Solved | PipelineStatus::Failed => None,
        }
    }

    /// `Start` -> `Recognized`.
    pub fn record_recognized(&mut self, text: impl Into<String>) -> Result<()> {
        self.transition(PipelineStatus::Recognized)?;
        self.result.recognized_text = Some(text.into());
        Ok(())
    }

    /// `Recognized` -> `Analyzed`.
    pub fn record_analysis(&mut self, analysis: AnalysisRecord) -> Result<()> {
        self.transition(PipelineStatus::Analyzed)?;
        self.result.analysis = Some(analysis);
        Ok(())
    }

    /// `Analyzed` -> `Solved` with a materialized solution.
    pub fn record_solution(&mut self, solution: SolutionRecord) -> Result<()> {
        self.transition(PipelineStatus::Solved)?;
        self.result.solution = Some(solution);
        Ok(())
    }

    /// `Analyzed` -> `Solved` after the solution was streamed to a consumer.
    pub fn record_streamed(&mut self) -> Result<()> {
        self.transition(PipelineStatus::Solved)
    }

    /// Any non-terminal status -> `Failed`, keeping earlier outputs.
    pub fn record_failure(&mut self, failure: &PipelineError) -> Result<()> {
        self.transition(PipelineStatus::Failed)?;
        self.result.error = Some(ErrorInfo {
            stage: failure.stage,
            message: failure.user_message(),
        });
        Ok(())
    }

    /// Any non-terminal status -> `Failed` because the caller gave up.
    pub fn record_cancelled(&mut self) -> Result<()> {
        let stage = self.pending_stage().unwrap_or(Stage::Generation);
        self.transition(PipelineStatus::Failed)?;
        self.result.error = Some(ErrorInfo {
            stage,
            message: CANCELLED_MESSAGE.to_string(),
        });
        Ok(())
    }

    /// Stores the history id of a solved run.
    pub fn record_history(&mut self, id: impl Into<String>) -> Result<()> {
        if self.status != PipelineStatus::Solved {
            return Err(TutorError::history(format!(
                "cannot attach history to a {} run",
                self.status
            )));
        }
        self.result.history_id = Some(id.into());
        Ok(())
    }

    /// Consumes the run and returns its outputs.
    #[must_use]
    pub fn into_result(self) -> PipelineResult {
        self.result
    }

    fn transition(&mut self, next: PipelineStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TutorError::invalid_transition(self.status, next));
        }
        debug!(from = %self.status, to = %next, "Pipeline transition");
        self.status = next;
        Ok(())
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives problems through recognition, analysis and generation.
///
/// Holds no per-run state; one orchestrator serves concurrent runs.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    history: Option<Arc<dyn HistoryStore>>,
    request_timeout: Duration,
    max_image_bytes: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("history", &self.history.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("max_image_bytes", &self.max_image_bytes)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator without a history store.
    #[must_use]
    pub fn new(gateway: Arc<dyn ModelGateway>, config: &Config) -> Self {
        Self {
            gateway,
            history: None,
            request_timeout: config.request_timeout(),
            max_image_bytes: config.max_image_bytes,
        }
    }

    /// Records solved runs of identified callers in `history`.
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Transcribes a problem image.
    ///
    /// The payload is checked against the size ceiling before any model call.
    pub async fn recognize(&self, image: &ImagePayload) -> std::result::Result<String, PipelineError> {
        image
            .ensure_within(self.max_image_bytes)
            .map_err(|e| PipelineError::new(Stage::Recognition, e))?;

        let request = ModelRequest::vision(RECOGNITION_INSTRUCTION, image.clone(), RECOGNITION_PARAMS)
            .with_timeout(self.request_timeout);
        let text = self
            .gateway
            .invoke(request)
            .await
            .map_err(|e| PipelineError::new(Stage::Recognition, e))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::new(
                Stage::Recognition,
                GatewayError::malformed("vision model returned no text"),
            ));
        }
        info!(
            format = %image.format(),
            bytes = image.decoded_len(),
            chars = text.chars().count(),
            "Problem recognized"
        );
        Ok(text.to_string())
    }

    /// Classifies a problem.
    pub async fn analyze(&self, text: &str) -> std::result::Result<AnalysisRecord, PipelineError> {
        let request = ModelRequest::text(analysis_prompt(text), ANALYSIS_PARAMS)
            .with_system(ANALYSIS_SYSTEM)
            .with_timeout(self.request_timeout);
        let raw = self
            .gateway
            .invoke(request)
            .await
            .map_err(|e| PipelineError::new(Stage::Analysis, e))?;

        let analysis = extract_analysis(&raw).map_err(|e| {
            warn!(raw_len = e.raw_text.len(), "Analysis output could not be recovered");
            PipelineError::new(Stage::Analysis, e)
        })?;
        info!(
            category = %analysis.category,
            subject = %analysis.subject,
            difficulty = %analysis.difficulty,
            "Problem analyzed"
        );
        Ok(analysis)
    }

    /// Writes a worked solution.
    ///
    /// Extraction never fails; missing sections stay empty.
    pub async fn generate(
        &self,
        text: &str,
        analysis: &AnalysisRecord,
    ) -> std::result::Result<SolutionRecord, PipelineError> {
        let request = ModelRequest::text(generation_prompt(text, analysis), GENERATION_PARAMS)
            .with_system(GENERATION_SYSTEM)
            .with_timeout(self.request_timeout);
        let raw = self
            .gateway
            .invoke(request)
            .await
            .map_err(|e| PipelineError::new(Stage::Generation, e))?;

        let solution = extract_solution(&raw);
        if solution.is_empty() {
            warn!(raw_len = raw.len(), "Solution output had no recognizable sections");
        }
        info!(steps = solution.steps.len(), "Solution generated");
        Ok(solution)
    }

    /// Returns the live generation stream for a problem.
    ///
    /// The stream is lazy; the model is called when it is first polled.
    #[must_use]
    pub fn generation_stream(&self, text: &str, analysis: &AnalysisRecord) -> EventStream {
        let request =
            ModelRequest::text(generation_prompt(text, analysis), STREAMING_GENERATION_PARAMS)
                .with_system(GENERATION_SYSTEM)
                .with_timeout(self.request_timeout);
        self.gateway.invoke_streaming(request)
    }

    /// Streams a worked solution into `sink`.
    ///
    /// Returns `Completed` or `Cancelled`; a stream that ends in `Error` is
    /// returned as a generation failure after the error event was delivered.
    pub async fn generate_streaming<S>(
        &self,
        text: &str,
        analysis: &AnalysisRecord,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> std::result::Result<RelayOutcome, PipelineError>
    where
        S: EventSink + ?Sized,
    {
        match relay(self.generation_stream(text, analysis), sink, cancel).await {
            RelayOutcome::Failed(message) => Err(stream_failure(message)),
            outcome => Ok(outcome),
        }
    }

    /// Runs the full pipeline and returns every output produced.
    ///
    /// A solved run of an identified caller is recorded once in the history
    /// store; a history failure is logged and does not affect the result.
    pub async fn solve(&self, input: RawInput, identity: Option<&Identity>) -> PipelineResult {
        let mut run = PipelineRun::new();
        if let Err(e) = self.solve_into(&mut run, input, identity).await {
            error!(error = %e, status = %run.status(), "Pipeline run aborted");
        }
        run.into_result()
    }

    /// Runs recognition and analysis, then streams the solution into `sink`.
    ///
    /// If an earlier stage fails, a single `Error` event carrying the user
    /// message is sent. Streamed runs are never recorded in history.
    pub async fn solve_streaming<S>(
        &self,
        input: RawInput,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> PipelineResult
    where
        S: EventSink + ?Sized,
    {
        let mut run = PipelineRun::new();
        if let Err(e) = self.solve_streaming_into(&mut run, input, sink, cancel).await {
            error!(error = %e, status = %run.status(), "Streaming run aborted");
        }
        run.into_result()
    }

    async fn solve_into(
        &self,
        run: &mut PipelineRun,
        input: RawInput,
        identity: Option<&Identity>,
    ) -> Result<()> {
        let Some((text, analysis)) = self.prepare(run, input).await? else {
            return Ok(());
        };

        let solution = match self.generate(&text, &analysis).await {
            Ok(solution) => solution,
            Err(e) => return fail(run, &e),
        };
        run.record_solution(solution.clone())?;
        info!(status = %run.status(), "Pipeline run solved");

        if let Some(identity) = identity {
            self.record_history(run, identity, text, analysis, solution)
                .await?;
        }
        Ok(())
    }

    async fn solve_streaming_into<S>(
        &self,
        run: &mut PipelineRun,
        input: RawInput,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: EventSink + ?Sized,
    {
        let prepared = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            prepared = self.prepare(run, input) => Some(prepared),
        };
        let Some(prepared) = prepared else {
            info!(status = %run.status(), "Streaming run cancelled before generation");
            return run.record_cancelled();
        };

        let Some((text, analysis)) = prepared? else {
            if let Some(error) = &run.result().error {
                if sink.send(StreamEvent::error(error.message.clone())).await.is_err() {
                    debug!("Consumer disconnected before the failure was delivered");
                }
            }
            return Ok(());
        };

        match self.generate_streaming(&text, &analysis, sink, cancel).await {
            Ok(RelayOutcome::Completed) => {
                run.record_streamed()?;
                info!(status = %run.status(), "Streaming run solved");
                Ok(())
            }
            Ok(RelayOutcome::Cancelled) => {
                info!("Streaming run cancelled during generation");
                run.record_cancelled()
            }
            Ok(RelayOutcome::Failed(message)) => fail(run, &stream_failure(message)),
            Err(e) => fail(run, &e),
        }
    }

    /// Runs the stages up to `Analyzed`.
    ///
    /// Returns `None` when a stage failed; the failure is already recorded.
    async fn prepare(
        &self,
        run: &mut PipelineRun,
        input: RawInput,
    ) -> Result<Option<(String, AnalysisRecord)>> {
        let text = match input {
            RawInput::Text(text) => text,
            RawInput::Image(image) => match self.recognize(&image).await {
                Ok(text) => text,
                Err(e) => {
                    fail(run, &e)?;
                    return Ok(None);
                }
            },
        };
        run.record_recognized(text.clone())?;

        match self.analyze(&text).await {
            Ok(analysis) => {
                run.record_analysis(analysis.clone())?;
                Ok(Some((text, analysis)))
            }
            Err(e) => {
                fail(run, &e)?;
                Ok(None)
            }
        }
    }

    async fn record_history(
        &self,
        run: &mut PipelineRun,
        identity: &Identity,
        question_text: String,
        analysis: AnalysisRecord,
        solution: SolutionRecord,
    ) -> Result<()> {
        let Some(history) = &self.history else {
            debug!("No history store configured");
            return Ok(());
        };

        let record = NewHistoryRecord {
            actor_id: identity.actor_id.clone(),
            actor_name: identity.actor_name.clone(),
            question_text,
            analysis,
            solution,
        };
        match history.create(record).await {
            Ok(stored) => {
                info!(history_id = %stored.id, actor_id = %identity.actor_id, "History recorded");
                run.record_history(stored.id)
            }
            Err(e) => {
                warn!(error = %e, actor_id = %identity.actor_id, "Failed to record history");
                Ok(())
            }
        }
    }
}

fn fail(run: &mut PipelineRun, failure: &PipelineError) -> Result<()> {
    warn!(
        stage = %failure.stage,
        transient = failure.is_transient(),
        error = %failure,
        "Pipeline stage failed"
    );
    run.record_failure(failure)
}

fn stream_failure(message: String) -> PipelineError {
    PipelineError::new(Stage::Generation, GatewayError::transport(message))
}
