use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use tracing::{error, info, info_span, warn};

use crate::{
    config::PipelineConfig,
    data::{CorpusCache, Event, EventSource, SequenceBuilder},
    embed::{self, EmbeddingTrainer, SkipGram, text},
    errors::{Result, Stage},
    report::{FileCheck, InputScale, RunReport},
};

/// Runs the stages of one embedding job in order.
///
/// Nothing is rolled back: files written before a fatal error stay on disk.
pub struct Pipeline {
    config: PipelineConfig,
    trainer: SkipGram,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let trainer = SkipGram::new(config.training.clone())?;
        Ok(Self { config, trainer })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage against `source` and write the report.
    ///
    /// Fatal errors come back wrapped in [`EmbedError::Stage`]. A file that
    /// fails verification is not fatal; see [`RunReport::verification_failed`].
    ///
    /// [`EmbedError::Stage`]: crate::errors::EmbedError::Stage
    pub fn run<S: EventSource + ?Sized>(&self, source: &S) -> Result<RunReport> {
        let span = info_span!("pipeline");
        let _guard = span.enter();

        let started_at = Local::now();
        let result = self.run_stages(source, started_at);
        if let Err(e) = &result {
            error!(error = %e, "pipeline failed");
        }
        result
    }

    fn run_stages<S: EventSource + ?Sized>(
        &self,
        source: &S,
        started_at: DateTime<Local>,
    ) -> Result<RunReport> {
        let cfg = &self.config;

        let (events, catalog) = self.stage_with(
            Stage::Load,
            || source.describe(),
            || Ok((source.events()?, source.catalog()?)),
        )?;
        let catalog = if catalog.is_empty() {
            warn!("catalog is empty, using entities seen in events");
            distinct_event_entities(&events)
        } else {
            catalog
        };

        let (corpus, stats) = self.stage(Stage::Sequences, || {
            if cfg.cache.enabled {
                let cache = open_cache(&cfg.cache.path)?;
                SequenceBuilder::with_cache(&cache).build_with_stats(&events, &cfg.sequence)
            } else {
                SequenceBuilder::new().build_with_stats(&events, &cfg.sequence)
            }
        })?;
        info!(
            sequences = corpus.len(),
            tokens = corpus.token_count(),
            from_cache = stats.from_cache,
            "corpus ready"
        );

        let trained = self.stage(Stage::Training, || self.trainer.train(&corpus))?;

        let item_vectors = trained.reordered(catalog.iter().map(String::as_str));
        let outside_catalog = trained.len().saturating_sub(item_vectors.len());
        if outside_catalog > 0 {
            warn!(outside_catalog, "trained entities missing from catalog are not written");
        }
        self.stage(Stage::WriteItems, || {
            text::write(&item_vectors, cfg.output.item_path())
        })?;

        let outcome = self.stage(Stage::Aggregation, || {
            Ok(embed::aggregate(
                &corpus,
                &trained,
                cfg.aggregation.min_surviving_entities,
            ))
        })?;

        self.stage(Stage::WriteActors, || {
            text::write(&outcome.vectors, cfg.output.actor_path())
        })?;

        let dimension = self.trainer.params().dimension;
        let item_file = check_file(cfg.output.item_path(), dimension);
        let actor_file = check_file(cfg.output.actor_path(), dimension);

        let report = RunReport {
            started_at,
            finished_at: Local::now(),
            config: cfg.clone(),
            input: InputScale {
                event_rows: stats.events,
                catalog_entities: catalog.len(),
                actors: stats.actors,
                qualifying_actors: stats.qualifying_actors,
                sequences: corpus.len(),
                corpus_tokens: corpus.token_count(),
                distinct_entities: corpus.distinct_entities().len(),
            },
            from_cache: stats.from_cache,
            item_vectors: item_vectors.len(),
            actor_vectors: outcome.vectors.len(),
            vocabulary: trained.len(),
            outside_catalog,
            actors_too_few_entities: outcome.too_few_count(),
            actor_failures: outcome.failure_count(),
            item_file,
            actor_file,
        };

        self.stage(Stage::Report, || {
            let path = cfg.output.report_path();
            create_parent(&path)?;
            fs::write(&path, report.render())?;
            Ok(())
        })?;

        info!(
            items = report.item_vectors,
            actors = report.actor_vectors,
            item_coverage = %format!("{:.1}%", report.item_coverage()),
            actor_coverage = %format!("{:.1}%", report.actor_coverage()),
            verified = !report.verification_failed(),
            "pipeline finished"
        );
        Ok(report)
    }

    fn stage<T>(&self, stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.stage_with(stage, || self.describe(stage), f)
    }

    fn stage_with<T>(
        &self,
        stage: Stage,
        context: impl FnOnce() -> String,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        info!(%stage, "stage started");
        f().map_err(|e| e.at_stage(stage, context()))
    }

    /// The parameters a stage depends on, for error context. Load context
    /// comes from the [`EventSource`] instead.
    fn describe(&self, stage: Stage) -> String {
        let cfg = &self.config;
        let s = &cfg.sequence;
        let t = &cfg.training;
        match stage {
            Stage::Load => String::new(),
            Stage::Sequences => format!(
                "min_actor_interactions={}, min_positive_score={}, min_sequence_length={}, \
                 min_entity_interactions={}, cache={}",
                s.min_actor_interactions,
                s.min_positive_score,
                s.min_sequence_length,
                s.min_entity_interactions,
                if cfg.cache.enabled {
                    cfg.cache.path.display().to_string()
                } else {
                    "disabled".to_string()
                }
            ),
            Stage::Training => format!(
                "dimension={}, window_size={}, min_frequency={}, negative_samples={}, \
                 epochs={}, parallelism={}, seed={}",
                t.dimension,
                t.window_size,
                t.min_frequency,
                t.negative_samples,
                t.epochs,
                t.parallelism,
                t.seed
            ),
            Stage::WriteItems => format!("path={}", cfg.output.item_path().display()),
            Stage::Aggregation => format!(
                "min_surviving_entities={}",
                cfg.aggregation.min_surviving_entities
            ),
            Stage::WriteActors => format!("path={}", cfg.output.actor_path().display()),
            Stage::Report => format!("path={}", cfg.output.report_path().display()),
        }
    }
}

fn open_cache(path: &Path) -> Result<CorpusCache> {
    create_parent(path)?;
    CorpusCache::open(path)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn check_file(path: PathBuf, dimension: usize) -> FileCheck {
    let result = text::verify(&path, dimension).map_err(|e| {
        warn!(path = %path.display(), error = %e, "verification failed, file kept");
        e.to_string()
    });
    FileCheck { path, result }
}

/// Entity ids in first-appearance order.
fn distinct_event_entities(events: &[Event]) -> Vec<String> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|e| seen.insert(e.entity_id.as_str()))
        .map(|e| e.entity_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_event_entities_first_appearance() {
        let events = vec![
            Event::new("a", "m2", 4.0, 1),
            Event::new("b", "m1", 4.0, 1),
            Event::new("a", "m2", 5.0, 2),
            Event::new("c", "m3", 1.0, 3),
        ];
        assert_eq!(distinct_event_entities(&events), vec!["m2", "m1", "m3"]);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.training.dimension = 0;
        assert!(Pipeline::new(config).is_err());
    }

    #[test]
    fn test_describe_names_parameters() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        assert!(pipeline.describe(Stage::Training).contains("min_frequency=5"));
        assert!(pipeline
            .describe(Stage::Sequences)
            .contains("min_actor_interactions=10"));
    }
}
