mod aggregate;
pub mod text;
mod trainer;
mod vector_map;

pub use aggregate::{AggregateOutcome, AggregationFailure, SkipReason, aggregate, mean_vector};
pub use text::FileSummary;
pub use trainer::{EmbeddingTrainer, SkipGram, train};
pub use vector_map::VectorMap;
