mod corpus;
mod db;
mod sequence;
mod source;

pub use corpus::{Corpus, Sequence};
pub use db::{CacheScope, CorpusCache};
pub use sequence::{BuildStats, SequenceBuilder, build_sequences};
pub use source::{CsvSource, Event, EventSource, MemorySource};
