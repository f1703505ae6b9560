use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbedError>;

/// Pipeline stage a fatal error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Sequences,
    Training,
    WriteItems,
    Aggregation,
    WriteActors,
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Sequences => "sequences",
            Stage::Training => "training",
            Stage::WriteItems => "write-items",
            Stage::Aggregation => "aggregation",
            Stage::WriteActors => "write-actors",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("event source yielded no rows")]
    EmptyInput,

    #[error("no actor has at least {min_actor_interactions} interactions ({actors} actors seen)")]
    NoQualifyingActors {
        min_actor_interactions: usize,
        actors: usize,
    },

    #[error("no entity occurs at least {min_frequency} times ({distinct} distinct entities in corpus)")]
    EmptyVocabulary { min_frequency: usize, distinct: usize },

    #[error("format mismatch in {path}: {message}")]
    FormatMismatch { path: String, message: String },

    #[error("invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("cache error: {0}")]
    Cache(#[from] rocksdb::Error),

    #[error("corpus encoding error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("corpus decoding error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("stage '{stage}' failed ({params}): {source}")]
    Stage {
        stage: Stage,
        params: String,
        #[source]
        source: Box<EmbedError>,
    },
}

impl EmbedError {
    /// Wrap an error with the stage and the parameters in effect.
    pub fn at_stage(self, stage: Stage, params: impl Into<String>) -> Self {
        EmbedError::Stage {
            stage,
            params: params.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through stage wrappers.
    pub fn root(&self) -> &EmbedError {
        match self {
            EmbedError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_format_mismatch(&self) -> bool {
        matches!(self.root(), EmbedError::FormatMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping_keeps_root() {
        let err = EmbedError::EmptyVocabulary {
            min_frequency: 5,
            distinct: 3,
        }
        .at_stage(Stage::Training, "min_frequency=5");

        let msg = err.to_string();
        assert!(msg.contains("training"));
        assert!(msg.contains("min_frequency=5"));
        assert!(matches!(err.root(), EmbedError::EmptyVocabulary { .. }));
    }

    #[test]
    fn test_format_mismatch_detected_through_wrapper() {
        let err = EmbedError::FormatMismatch {
            path: "userEmb.csv".into(),
            message: "expected 4 components, found 3".into(),
        }
        .at_stage(Stage::WriteActors, "");
        assert!(err.is_format_mismatch());
        assert!(!EmbedError::EmptyInput.is_format_mismatch());
    }
}
