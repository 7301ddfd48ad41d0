//! Error types for the tutor pipeline.
//!
//! Errors are layered the same way the pipeline is: input validation,
//! model gateway calls, structured extraction, and the stage-tagged
//! [`PipelineError`] that the orchestrator hands back to callers. The
//! crate-level [`TutorError`] wraps all of them together with configuration
//! and persistence failures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A specialized `Result` type for tutor pipeline operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while configuring or running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Pipeline Errors
    // ========================================================================
    /// Raw input was rejected before any model call.
    #[error(transparent)]
    Input(#[from] InputError),

    /// A model call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Model output could not be turned into a typed record.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// A pipeline stage failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    // ========================================================================
    // History Errors
    // ========================================================================
    /// The history store rejected a record.
    #[error("Failed to record history: {message}")]
    History {
        /// Description of the store failure.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a new `History` error.
    #[must_use]
    pub fn history(message: impl Into<String>) -> Self {
        Self::History {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_transient(),
            Self::Pipeline(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if this error is fatal and retrying cannot help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } | Self::Input(_)
        )
    }
}

// ============================================================================
// Gateway Errors
// ============================================================================

/// Categories of model gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// The call did not complete within its deadline.
    Timeout,
    /// Connection failure or a non-success HTTP status.
    Transport,
    /// The response lacked the expected completion field.
    MalformedResponse,
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
            Self::MalformedResponse => write!(f, "malformed_response"),
        }
    }
}

impl GatewayErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Timeout => "Retry later or raise requestTimeoutSecs in tutor.json",
            Self::Transport => "Check the endpoint URL, API key and network connection",
            Self::MalformedResponse => "Check that the endpoint speaks the chat-completions protocol",
        }
    }
}

/// A normalized failure from a model backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Model gateway error ({kind}): {detail}\n\nSuggestion: {}", .kind.suggestion())]
pub struct GatewayError {
    /// What went wrong.
    pub kind: GatewayErrorKind,
    /// Backend-specific detail, for logs only.
    pub detail: String,
}

impl GatewayError {
    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Timeout,
            detail: detail.into(),
        }
    }

    /// Creates a `Transport` error.
    #[must_use]
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Transport,
            detail: detail.into(),
        }
    }

    /// Creates a `MalformedResponse` error.
    #[must_use]
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::MalformedResponse,
            detail: detail.into(),
        }
    }

    /// Returns `true` if a caller-layered retry could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::Timeout | GatewayErrorKind::Transport
        )
    }
}

// ============================================================================
// Extraction Errors
// ============================================================================

/// Categories of structured extraction failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    /// No recovery strategy produced a valid analysis record.
    UnparsableAnalysis,
}

/// Model output that could not be recovered into a typed record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Could not recover an analysis record from model output ({} bytes)", .raw_text.len())]
pub struct ExtractionError {
    /// What went wrong.
    pub kind: ExtractionErrorKind,
    /// The unmodified model output.
    pub raw_text: String,
}

impl ExtractionError {
    /// Creates an `UnparsableAnalysis` error carrying the raw model text.
    #[must_use]
    pub fn unparsable_analysis(raw_text: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::UnparsableAnalysis,
            raw_text: raw_text.into(),
        }
    }
}

// ============================================================================
// Input Errors
// ============================================================================

/// Raw input rejected before any network call.
///
/// Messages are safe to show to end users.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// The image payload was empty.
    #[error("The image is empty")]
    EmptyImage,

    /// The payload was not valid base64 or not a well-formed data URL.
    #[error("The image could not be decoded: {message}")]
    MalformedImage {
        /// Description of the decoding failure.
        message: String,
    },

    /// The declared MIME type is not a supported image format.
    #[error("Unsupported image format '{mime}': use png, jpeg, gif, webp or bmp")]
    UnsupportedImageFormat {
        /// The declared MIME type.
        mime: String,
    },

    /// The decoded image exceeds the configured ceiling.
    #[error("The image is too large ({size} bytes, limit {limit} bytes)")]
    ImageTooLarge {
        /// Decoded size in bytes.
        size: usize,
        /// Configured ceiling in bytes.
        limit: usize,
    },
}

impl InputError {
    /// Creates a new `MalformedImage` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedImage {
            message: message.into(),
        }
    }
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// The pipeline stage in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Image transcription.
    Recognition,
    /// Problem classification.
    Analysis,
    /// Solution generation.
    Generation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recognition => write!(f, "recognition"),
            Self::Analysis => write!(f, "analysis"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// The underlying cause of a stage failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageCause {
    /// The model call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The model output could not be recovered.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// The input was rejected.
    #[error(transparent)]
    Input(#[from] InputError),
}

/// A stage-tagged failure returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} stage failed: {cause}")]
pub struct PipelineError {
    /// Where the run stopped.
    pub stage: Stage,
    /// Why it stopped.
    #[source]
    pub cause: StageCause,
}

impl PipelineError {
    /// Creates a new `PipelineError` for the given stage.
    #[must_use]
    pub fn new(stage: Stage, cause: impl Into<StageCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    /// Returns a message naming the failed stage, free of backend detail.
    #[must_use]
    pub fn user_message(&self) -> String {
        let stage = match self.stage {
            Stage::Recognition => "Recognition",
            Stage::Analysis => "Analysis",
            Stage::Generation => "Solution generation",
        };
        match &self.cause {
            StageCause::Input(e) => format!("{stage} failed: {e}"),
            StageCause::Extraction(_) => {
                format!("{stage} failed: the model response could not be understood")
            }
            StageCause::Gateway(e) => match e.kind {
                GatewayErrorKind::Timeout => {
                    format!("{stage} failed: the model service timed out, please try again")
                }
                GatewayErrorKind::Transport => {
                    format!("{stage} failed: the model service is unavailable")
                }
                GatewayErrorKind::MalformedResponse => {
                    format!("{stage} failed: the model service returned an unexpected response")
                }
            },
        }
    }

    /// Returns `true` if rerunning the stage could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match &self.cause {
            StageCause::Gateway(e) => e.is_transient(),
            StageCause::Extraction(_) | StageCause::Input(_) => false,
        }
    }
}
