// EchoLens Core Services

pub mod analysis;
pub mod config_store;
pub mod providers;
pub mod sentence_segmenter;
pub mod source_bias;
pub mod text_processor;

pub use analysis::*;
pub use config_store::*;
pub use providers::*;
pub use sentence_segmenter::*;
pub use source_bias::*;
pub use text_processor::*;
