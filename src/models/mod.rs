// EchoLens Data Models
// Shared shapes for the analyze and debate pipelines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Sentences & Chunks ============

/// Byte range of one sentence inside the analyzed text.
///
/// Whitespace that follows a sentence belongs to that sentence's span, so the
/// spans of a document are contiguous and concatenating them reproduces the
/// trimmed input exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceSpan {
    /// UTF-8 byte offset (0-based) into the analyzed text.
    pub start: usize,
    /// UTF-8 byte offset (0-based, end-exclusive) into the analyzed text.
    pub end: usize,
}

impl SentenceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw slice including trailing whitespace.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.start..self.end).unwrap_or("")
    }

    /// Sentence content without the attached whitespace.
    pub fn content<'a>(&self, text: &'a str) -> &'a str {
        self.slice(text).trim()
    }
}

/// A sentence-aligned slice of the input sent to a classifier as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: usize,
    pub sentences: Vec<SentenceSpan>,
    pub start: usize,
    pub end: usize,
    /// Exact source slice `[start, end)`, attached whitespace included.
    pub text: String,
    pub token_count: usize,
}

impl Chunk {
    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    /// True for the single-sentence escape: one sentence larger than the budget.
    pub fn is_oversized(&self, token_budget: usize) -> bool {
        self.token_count > token_budget
    }

    /// Text handed to the classifier.
    pub fn classifier_input(&self) -> &str {
        self.text.trim()
    }
}

// ============ Classifier Kinds ============

const BIAS_LABELS: &[&str] = &["Left", "Center", "Right"];
const EMOTION_LABELS: &[&str] = &[
    "anger", "disgust", "fear", "joy", "neutral", "sadness", "surprise",
];

/// Default tie-break order: on an exact tie of aggregated mass the label
/// listed first wins.
const BIAS_PRIORITY: &[&str] = &["Center", "Left", "Right"];
const EMOTION_PRIORITY: &[&str] = &[
    "neutral", "joy", "sadness", "anger", "fear", "surprise", "disgust",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Bias,
    Emotion,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 2] = [ClassifierKind::Bias, ClassifierKind::Emotion];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierKind::Bias => "bias",
            ClassifierKind::Emotion => "emotion",
        }
    }

    pub fn default_labels(&self) -> &'static [&'static str] {
        match self {
            ClassifierKind::Bias => BIAS_LABELS,
            ClassifierKind::Emotion => EMOTION_LABELS,
        }
    }

    pub fn default_priority(&self) -> &'static [&'static str] {
        match self {
            ClassifierKind::Bias => BIAS_PRIORITY,
            ClassifierKind::Emotion => EMOTION_PRIORITY,
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bias" => Ok(ClassifierKind::Bias),
            "emotion" => Ok(ClassifierKind::Emotion),
            other => Err(format!("unknown classifier kind: {}", other)),
        }
    }
}

// ============ Predictions ============

/// Probability mass over a classifier's fixed label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassProbabilities {
    /// Top label.
    pub label: String,
    /// Probability of the top label.
    pub confidence: f64,
    pub scores: BTreeMap<String, f64>,
}

impl ClassProbabilities {
    pub fn get(&self, label: &str) -> f64 {
        self.scores.get(label).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.scores.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPrediction {
    pub chunk_index: usize,
    pub probabilities: ClassProbabilities,
    /// Top-label probability, used as the aggregation weight.
    pub model_confidence: f64,
}

impl ChunkPrediction {
    pub fn new(chunk_index: usize, probabilities: ClassProbabilities) -> Self {
        let model_confidence = probabilities.confidence;
        Self {
            chunk_index,
            probabilities,
            model_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub reason: String,
}

// ============ Aggregation ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    ConfidenceWeighted,
    /// Every chunk weight was zero.
    UnweightedMean,
}

/// Document-level verdict for one classifier kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub kind: ClassifierKind,
    #[serde(flatten)]
    pub distribution: ClassProbabilities,
    pub method: AggregationMethod,
    /// Chunks that contributed to the distribution.
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<ChunkFailure>,
}

impl AggregatedResult {
    pub fn label(&self) -> &str {
        &self.distribution.label
    }

    pub fn confidence(&self) -> f64 {
        self.distribution.confidence
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_chunks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Present when bias classification was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias: Option<AggregatedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<AggregatedResult>,
    /// At least one chunk of a requested classifier failed and was left out.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_bias: Option<SourceBiasRating>,
}

impl AnalyzeResponse {
    pub fn result(&self, kind: ClassifierKind) -> Option<&AggregatedResult> {
        match kind {
            ClassifierKind::Bias => self.bias.as_ref(),
            ClassifierKind::Emotion => self.emotion.as_ref(),
        }
    }
}

// ============ Debate ============

/// Central, debatable assertion extracted from a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claim(String);

impl Claim {
    /// Returns `None` for blank input.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arguments on both sides of one claim. Either side may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentSet {
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub claim: Claim,
    pub for_points: Vec<String>,
    pub against_points: Vec<String>,
}

// ============ Reference Data ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBiasRating {
    pub domain: String,
    pub label: String,
}
