//! Pipeline configuration.
//!
//! Every knob of a run lives here and is passed down explicitly; nothing is
//! read from process globals once the config has been built.
//!
//! ```toml
//! [sequence]
//! min_actor_interactions = 10
//! min_positive_score = 3.5
//! min_sequence_length = 5
//!
//! [training]
//! dimension = 100
//! epochs = 20
//! seed = 42
//!
//! [output]
//! dir = "embeddings"
//! ```

use std::env;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::errors::{EmbedError, Result};

/// Filtering policy for sequence construction. Also the cache scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct SequenceParams {
    pub min_actor_interactions: usize,
    pub min_positive_score: f64,
    pub min_sequence_length: usize,
    /// Drop entities with fewer raw events than this before filtering. 0 disables.
    pub min_entity_interactions: usize,
}

impl Default for SequenceParams {
    fn default() -> Self {
        Self {
            min_actor_interactions: 10,
            min_positive_score: 3.5,
            min_sequence_length: 5,
            min_entity_interactions: 0,
        }
    }
}

impl SequenceParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.min_positive_score.is_finite() {
            return Err("min_positive_score must be finite".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    pub dimension: usize,
    pub window_size: usize,
    pub min_frequency: usize,
    pub negative_samples: usize,
    pub epochs: usize,
    pub parallelism: usize,
    pub seed: u64,
    /// Initial learning rate.
    pub alpha: f32,
    /// Learning rate reached at the end of the last epoch.
    pub min_alpha: f32,
    /// Subsampling threshold for frequent entities. 0 disables.
    pub sample: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            dimension: 100,
            window_size: 5,
            min_frequency: 5,
            negative_samples: 10,
            epochs: 20,
            parallelism: 4,
            seed: 42,
            alpha: 0.025,
            min_alpha: 0.0001,
            sample: 1e-3,
        }
    }
}

impl TrainParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.dimension == 0 {
            return Err("dimension must be > 0".into());
        }
        if self.window_size == 0 {
            return Err("window_size must be > 0".into());
        }
        if self.min_frequency == 0 {
            return Err("min_frequency must be >= 1".into());
        }
        if self.epochs == 0 {
            return Err("epochs must be > 0".into());
        }
        if self.parallelism == 0 {
            return Err("parallelism must be > 0".into());
        }
        if !(self.alpha > 0.0) || !(self.min_alpha >= 0.0) || self.min_alpha > self.alpha {
            return Err(format!(
                "learning rate must satisfy 0 <= min_alpha ({}) <= alpha ({}) and alpha > 0",
                self.min_alpha, self.alpha
            ));
        }
        if !(self.sample >= 0.0) {
            return Err("sample must be >= 0".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateParams {
    pub min_surviving_entities: usize,
}

impl Default for AggregateParams {
    fn default() -> Self {
        Self {
            min_surviving_entities: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub item_file: String,
    pub actor_file: String,
    pub report_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("embeddings"),
            item_file: "item2vecEmb.csv".into(),
            actor_file: "userEmb.csv".into(),
            report_file: "training_report.txt".into(),
        }
    }
}

impl OutputConfig {
    pub fn item_path(&self) -> PathBuf {
        self.dir.join(&self.item_file)
    }

    pub fn actor_path(&self) -> PathBuf {
        self.dir.join(&self.actor_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// RocksDB directory holding cached corpora.
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("cache/sequences_db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sequence: SequenceParams,
    #[serde(default)]
    pub training: TrainParams,
    #[serde(default)]
    pub aggregation: AggregateParams,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EmbedError::InvalidConfig(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&contents).map_err(|e| {
            EmbedError::InvalidConfig(format!(
                "failed to parse TOML in '{}': {}",
                path.display(),
                e
            ))
        })
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| EmbedError::InvalidConfig(format!("failed to parse TOML: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EmbedError::InvalidConfig(format!("failed to serialize TOML: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.sequence
            .validate()
            .map_err(|e| EmbedError::InvalidConfig(format!("[sequence] {}", e)))?;
        self.training
            .validate()
            .map_err(|e| EmbedError::InvalidConfig(format!("[training] {}", e)))?;
        if self.output.item_file.is_empty() || self.output.actor_file.is_empty() {
            return Err(EmbedError::InvalidConfig(
                "[output] file names must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Apply `SEQEMBED_*` environment overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `SEQEMBED_DIMENSION` | `training.dimension` |
    /// | `SEQEMBED_EPOCHS` | `training.epochs` |
    /// | `SEQEMBED_PARALLELISM` | `training.parallelism` |
    /// | `SEQEMBED_SEED` | `training.seed` |
    /// | `SEQEMBED_MIN_FREQUENCY` | `training.min_frequency` |
    /// | `SEQEMBED_OUTPUT_DIR` | `output.dir` |
    /// | `SEQEMBED_CACHE_ENABLED` | `cache.enabled` |
    /// | `SEQEMBED_CACHE_PATH` | `cache.path` |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = env_parse::<usize>("SEQEMBED_DIMENSION") {
            self.training.dimension = n;
        }
        if let Some(n) = env_parse::<usize>("SEQEMBED_EPOCHS") {
            self.training.epochs = n;
        }
        if let Some(n) = env_parse::<usize>("SEQEMBED_PARALLELISM") {
            self.training.parallelism = n;
        }
        if let Some(n) = env_parse::<u64>("SEQEMBED_SEED") {
            self.training.seed = n;
        }
        if let Some(n) = env_parse::<usize>("SEQEMBED_MIN_FREQUENCY") {
            self.training.min_frequency = n;
        }
        if let Ok(val) = env::var("SEQEMBED_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(val);
        }
        if let Some(b) = env_parse::<bool>("SEQEMBED_CACHE_ENABLED") {
            self.cache.enabled = b;
        }
        if let Ok(val) = env::var("SEQEMBED_CACHE_PATH") {
            self.cache.path = PathBuf::from(val);
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
