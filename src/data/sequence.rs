use std::collections::HashMap;

use tracing::{debug, info};

use crate::{
    config::SequenceParams,
    data::{
        corpus::{Corpus, Sequence},
        db::{CacheScope, CorpusCache},
        source::Event,
    },
    errors::{EmbedError, Result},
};

/// Counts gathered while building a corpus, for the run report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    pub events: usize,
    pub actors: usize,
    pub qualifying_actors: usize,
    pub sequences: usize,
    pub from_cache: bool,
}

/// Builds per-actor sequences, optionally backed by a [`CorpusCache`].
pub struct SequenceBuilder<'a> {
    cache: Option<&'a CorpusCache>,
}

impl<'a> SequenceBuilder<'a> {
    pub fn new() -> Self {
        Self { cache: None }
    }

    pub fn with_cache(cache: &'a CorpusCache) -> Self {
        Self { cache: Some(cache) }
    }

    pub fn build(&self, events: &[Event], params: &SequenceParams) -> Result<Corpus> {
        self.build_with_stats(events, params).map(|(corpus, _)| corpus)
    }

    pub fn build_with_stats(
        &self,
        events: &[Event],
        params: &SequenceParams,
    ) -> Result<(Corpus, BuildStats)> {
        if events.is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let Some(cache) = self.cache else {
            return build_sequences(events, params);
        };

        let scope = CacheScope::new(params, events);
        if let Some(corpus) = cache.load(&scope)? {
            info!(sequences = corpus.len(), "loaded cached corpus");
            let stats = BuildStats {
                events: events.len(),
                actors: count_by_actor(events).len(),
                qualifying_actors: qualifying_count(events, params),
                sequences: corpus.len(),
                from_cache: true,
            };
            return Ok((corpus, stats));
        }

        let (corpus, stats) = build_sequences(events, params)?;
        cache.store(&scope, &corpus)?;
        info!(sequences = corpus.len(), "cached corpus");
        Ok((corpus, stats))
    }
}

impl Default for SequenceBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Actors in first-appearance order with their event counts.
fn count_by_actor(events: &[Event]) -> Vec<(&str, usize)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for event in events {
        let slot = *index.entry(event.actor_id.as_str()).or_insert_with(|| {
            counts.push((event.actor_id.as_str(), 0));
            counts.len() - 1
        });
        counts[slot].1 += 1;
    }
    counts
}

fn qualifying_count(events: &[Event], params: &SequenceParams) -> usize {
    count_by_actor(events)
        .iter()
        .filter(|(_, n)| *n >= params.min_actor_interactions)
        .count()
}

/// The uncached four-step build. Errors on empty input or when no actor
/// reaches `min_actor_interactions`; an empty corpus is otherwise valid.
pub fn build_sequences(events: &[Event], params: &SequenceParams) -> Result<(Corpus, BuildStats)> {
    if events.is_empty() {
        return Err(EmbedError::EmptyInput);
    }

    // Step 1: actor qualification, most active first
    let counts = count_by_actor(events);
    let mut ranked: Vec<(&str, usize)> = counts
        .iter()
        .filter(|(_, n)| *n >= params.min_actor_interactions)
        .copied()
        .collect();
    // stable: equal counts keep first-appearance order
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let qualifying: Vec<&str> = ranked.into_iter().map(|(actor, _)| actor).collect();

    if qualifying.is_empty() {
        return Err(EmbedError::NoQualifyingActors {
            min_actor_interactions: params.min_actor_interactions,
            actors: counts.len(),
        });
    }
    debug!(
        actors = counts.len(),
        qualifying = qualifying.len(),
        "actor qualification done"
    );

    let popular = entity_filter(events, params.min_entity_interactions);

    let mut by_actor: HashMap<&str, Vec<&Event>> =
        qualifying.iter().map(|a| (*a, Vec::new())).collect();

    // Step 2: positive filtering, input order preserved
    for event in events {
        // NaN scores are never positive
        if !(event.score >= params.min_positive_score) {
            continue;
        }
        if let Some(popular) = &popular {
            if !popular.contains_key(event.entity_id.as_str()) {
                continue;
            }
        }
        if let Some(list) = by_actor.get_mut(event.actor_id.as_str()) {
            list.push(event);
        }
    }

    let mut sequences = Vec::new();
    for actor in &qualifying {
        let Some(mut liked) = by_actor.remove(actor) else {
            continue;
        };
        // Step 3: stable, so equal timestamps keep input order
        liked.sort_by_key(|e| e.timestamp);

        // Step 4: all or nothing
        if liked.len() < params.min_sequence_length {
            continue;
        }
        sequences.push(Sequence {
            actor_id: actor.to_string(),
            items: liked.iter().map(|e| e.entity_id.clone()).collect(),
        });
    }

    let stats = BuildStats {
        events: events.len(),
        actors: counts.len(),
        qualifying_actors: qualifying.len(),
        sequences: sequences.len(),
        from_cache: false,
    };
    info!(
        events = stats.events,
        qualifying_actors = stats.qualifying_actors,
        sequences = stats.sequences,
        "built corpus"
    );

    Ok((Corpus::new(sequences), stats))
}

/// Entities with at least `min` raw events, or `None` when disabled.
fn entity_filter(events: &[Event], min: usize) -> Option<HashMap<&str, usize>> {
    if min == 0 {
        return None;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for event in events {
        *counts.entry(event.entity_id.as_str()).or_insert(0) += 1;
    }
    counts.retain(|_, n| *n >= min);
    Some(counts)
}
