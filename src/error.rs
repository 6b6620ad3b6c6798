// Pipeline Errors
// Request-level failures surfaced to callers and per-call outcomes absorbed internally

use crate::models::ClassifierKind;
use crate::services::providers::ProviderError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Classification(ClassifierKind),
    ClaimExtraction,
    ArgumentGeneration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validation => f.write_str("input validation"),
            Stage::Classification(kind) => write!(f, "{} classification", kind),
            Stage::ClaimExtraction => f.write_str("claim extraction"),
            Stage::ArgumentGeneration => f.write_str("argument generation"),
        }
    }
}

/// Outcome of a single failed external model call.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("malformed model output: {0}")]
    Malformed(String),
    #[error("model returned empty content")]
    Empty,
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Timeout(_) => true,
            CallError::Provider(ProviderError::HttpError(_)) => true,
            CallError::Provider(ProviderError::ApiError { status, .. }) => {
                *status == 429 || *status >= 500
            }
            CallError::Provider(_) => false,
            CallError::Malformed(_) | CallError::Empty => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input text too short: {actual_chars} chars, minimum is {min_chars}")]
    InvalidInput { min_chars: usize, actual_chars: usize },
    #[error("{kind} classification unavailable: all {attempted} chunks failed (last error: {last_error})")]
    ClassificationUnavailable {
        kind: ClassifierKind,
        attempted: usize,
        last_error: String,
    },
    #[error("claim extraction failed: {0}")]
    ClaimExtraction(#[source] CallError),
    #[error("argument generation failed: {0}")]
    ArgumentGeneration(#[source] CallError),
    #[error("request cancelled during {0}")]
    Cancelled(Stage),
    #[error("no classifier registered for {0}")]
    MissingClassifier(ClassifierKind),
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stage that produced the failure, when there is one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::InvalidInput { .. } => Some(Stage::Validation),
            PipelineError::ClassificationUnavailable { kind, .. } => {
                Some(Stage::Classification(*kind))
            }
            PipelineError::ClaimExtraction(_) => Some(Stage::ClaimExtraction),
            PipelineError::ArgumentGeneration(_) => Some(Stage::ArgumentGeneration),
            PipelineError::Cancelled(stage) => Some(*stage),
            PipelineError::MissingClassifier(kind) => Some(Stage::Classification(*kind)),
            PipelineError::Config(_) => None,
        }
    }

    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::ClassificationUnavailable { .. } => true,
            PipelineError::ClaimExtraction(e) | PipelineError::ArgumentGeneration(e) => {
                e.is_retryable()
            }
            PipelineError::InvalidInput { .. }
            | PipelineError::Cancelled(_)
            | PipelineError::MissingClassifier(_)
            | PipelineError::Config(_) => false,
        }
    }
}
