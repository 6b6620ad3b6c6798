// Analysis Module
// Chunked classification, aggregation and the debate orchestrator

pub mod aggregation;
pub mod chunk_builder;
pub mod classifier;
pub mod debate;
pub mod pipeline;

pub use aggregation::{aggregate_predictions, Aggregate};
pub use chunk_builder::{build_chunks, DEFAULT_TOKEN_BUDGET};
pub use classifier::{
    classify_chunks, ChunkOutcome, ClassifierProfile, ClassifierSlot, InferenceClassifier,
    InvocationSettings, SequenceClassifier,
};
pub use debate::{
    parse_arguments, parse_claim, DebateOrchestrator, DebateSettings, OpenAiChatGenerator,
    TextGenerator,
};
pub use pipeline::AnalysisService;
