use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::{config::PipelineConfig, embed::FileSummary};

/// Sizes of what went into a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputScale {
    pub event_rows: usize,
    /// Item coverage denominator.
    pub catalog_entities: usize,
    pub actors: usize,
    pub qualifying_actors: usize,
    /// Actor coverage denominator.
    pub sequences: usize,
    pub corpus_tokens: usize,
    pub distinct_entities: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileCheck {
    pub path: PathBuf,
    pub result: Result<FileSummary, String>,
}

impl FileCheck {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    fn describe(&self) -> String {
        match &self.result {
            Ok(FileSummary {
                line_count,
                first_entry_dimension: Some(dim),
            }) => format!("ok, {} lines, dimension {}", line_count, dim),
            Ok(FileSummary { line_count, .. }) => format!("ok, {} lines", line_count),
            Err(message) => format!("FAILED: {}", message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub config: PipelineConfig,
    pub input: InputScale,
    pub from_cache: bool,
    pub item_vectors: usize,
    pub actor_vectors: usize,
    pub vocabulary: usize,
    /// Trained entities missing from the catalog, hence not written.
    pub outside_catalog: usize,
    pub actors_too_few_entities: usize,
    pub actor_failures: usize,
    pub item_file: FileCheck,
    pub actor_file: FileCheck,
}

/// `part / whole` as a percentage, 0 when `whole` is 0.
pub fn coverage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

impl RunReport {
    pub fn item_coverage(&self) -> f64 {
        coverage(self.item_vectors, self.input.catalog_entities)
    }

    pub fn actor_coverage(&self) -> f64 {
        coverage(self.actor_vectors, self.input.sequences)
    }

    pub fn verification_failed(&self) -> bool {
        !self.item_file.is_ok() || !self.actor_file.is_ok()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.config.sequence;
        let t = &self.config.training;

        writeln!(f, "=== Embedding training report ===")?;
        writeln!(f, "Run started:  {}", self.started_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Run finished: {}", self.finished_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f)?;
        writeln!(f, "Input:")?;
        writeln!(f, "  events:             {}", self.input.event_rows)?;
        writeln!(f, "  catalog entities:   {}", self.input.catalog_entities)?;
        writeln!(f, "  actors:             {}", self.input.actors)?;
        writeln!(f, "  qualifying actors:  {}", self.input.qualifying_actors)?;
        writeln!(
            f,
            "  sequences:          {} ({})",
            self.input.sequences,
            if self.from_cache { "from cache" } else { "built" }
        )?;
        writeln!(f, "  corpus tokens:      {}", self.input.corpus_tokens)?;
        writeln!(f, "  distinct entities:  {}", self.input.distinct_entities)?;
        writeln!(f)?;
        writeln!(f, "Parameters:")?;
        writeln!(f, "  min_actor_interactions:  {}", s.min_actor_interactions)?;
        writeln!(f, "  min_positive_score:      {}", s.min_positive_score)?;
        writeln!(f, "  min_sequence_length:     {}", s.min_sequence_length)?;
        writeln!(f, "  min_entity_interactions: {}", s.min_entity_interactions)?;
        writeln!(f, "  dimension:               {}", t.dimension)?;
        writeln!(f, "  window_size:             {}", t.window_size)?;
        writeln!(f, "  min_frequency:           {}", t.min_frequency)?;
        writeln!(f, "  negative_samples:        {}", t.negative_samples)?;
        writeln!(f, "  epochs:                  {}", t.epochs)?;
        writeln!(f, "  parallelism:             {}", t.parallelism)?;
        writeln!(f, "  seed:                    {}", t.seed)?;
        writeln!(f, "  alpha / min_alpha:       {} / {}", t.alpha, t.min_alpha)?;
        writeln!(f, "  sample:                  {}", t.sample)?;
        writeln!(
            f,
            "  min_surviving_entities:  {}",
            self.config.aggregation.min_surviving_entities
        )?;
        writeln!(f)?;
        writeln!(f, "Output:")?;
        writeln!(f, "  vocabulary:      {}", self.vocabulary)?;
        writeln!(f, "  item vectors:    {}", self.item_vectors)?;
        writeln!(f, "  actor vectors:   {}", self.actor_vectors)?;
        writeln!(f, "  item coverage:   {:.1}%", self.item_coverage())?;
        writeln!(f, "  actor coverage:  {:.1}%", self.actor_coverage())?;
        writeln!(f)?;
        writeln!(f, "Skipped:")?;
        writeln!(
            f,
            "  actors below min_surviving_entities: {}",
            self.actors_too_few_entities
        )?;
        writeln!(f, "  actor aggregation failures:          {}", self.actor_failures)?;
        writeln!(f, "  trained entities outside catalog:    {}", self.outside_catalog)?;
        writeln!(f)?;
        writeln!(f, "Files:")?;
        writeln!(
            f,
            "  {} ({})",
            self.item_file.path.display(),
            self.item_file.describe()
        )?;
        writeln!(
            f,
            "  {} ({})",
            self.actor_file.path.display(),
            self.actor_file.describe()
        )?;
        if self.config.cache.enabled {
            writeln!(f, "  cache: {}", self.config.cache.path.display())?;
        } else {
            writeln!(f, "  cache: disabled")?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Outputs are best-effort and non-transactional: files written before a failure are left in place."
        )?;
        Ok(())
    }
}
