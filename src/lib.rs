pub mod config;
pub mod data;
pub mod embed;
pub mod errors;
pub mod pipeline;
pub mod report;

// Exports for external use
pub use config::PipelineConfig;
pub use data::{Corpus, CsvSource, Event, EventSource, MemorySource, Sequence};
pub use embed::{EmbeddingTrainer, SkipGram, VectorMap};
pub use errors::{EmbedError, Result};
pub use pipeline::Pipeline;
pub use report::RunReport;
