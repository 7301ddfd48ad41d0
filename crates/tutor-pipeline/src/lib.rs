//! Tutor Pipeline
//!
//! Turns a problem, typed or photographed, into a classified problem and a
//! worked solution by driving generative model endpoints through three
//! stages: recognition, analysis and generation. Solutions are returned
//! whole or relayed to a consumer as a stream of events.

pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod extract;
pub mod gateway;
pub mod history;
pub mod input;
pub mod pipeline;
pub mod prompts;
pub mod records;
pub mod relay;

pub use config::{Config, ModelEndpoint, CONFIG_FILE_NAME};
pub use error::{
    ExtractionError, ExtractionErrorKind, GatewayError, GatewayErrorKind, InputError,
    PipelineError, Result, Stage, StageCause, TutorError,
};
pub use event::{EventStream, StreamEvent};
pub use extract::{extract_analysis, extract_solution};
pub use gateway::{HttpGateway, Modality, ModelGateway, ModelRequest};
pub use history::{HistoryRecord, HistoryStore, Identity, InMemoryHistory, NewHistoryRecord};
pub use input::{ImageFormat, ImagePayload, RawInput};
pub use pipeline::{Orchestrator, PipelineRun};
pub use records::{
    AnalysisRecord, Category, Difficulty, ErrorInfo, PipelineResult, PipelineStatus,
    SolutionRecord,
};
pub use relay::{relay, EventSink, RelayOutcome, SinkClosed, SseWriter};
