use tracing::{debug, info, warn};

use crate::{data::Corpus, embed::vector_map::VectorMap};

/// Why a sequence got no actor vector.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Fewer entities survived the frequency cutoff than required.
    TooFewEntities { surviving: usize, required: usize },
    /// The mean contained NaN or infinity.
    NonFinite { component: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::TooFewEntities {
                surviving,
                required,
            } => write!(f, "{} surviving entities, {} required", surviving, required),
            SkipReason::NonFinite { component } => {
                write!(f, "non-finite value in component {}", component)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationFailure {
    /// 1-based position of the sequence in the corpus.
    pub index: usize,
    pub actor_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub vectors: VectorMap,
    pub skipped: Vec<AggregationFailure>,
}

impl AggregateOutcome {
    pub fn too_few_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|f| matches!(f.reason, SkipReason::TooFewEntities { .. }))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.skipped.len() - self.too_few_count()
    }
}

/// Mean of the item vectors present in `items`, or `None` when empty.
pub fn mean_vector<'a>(
    items: impl IntoIterator<Item = &'a str>,
    vectors: &VectorMap,
) -> Option<(Vec<f32>, usize)> {
    let mut sum = vec![0f64; vectors.dimension()];
    let mut count = 0;

    for id in items {
        if let Some(emb) = vectors.get(id) {
            for (acc, x) in sum.iter_mut().zip(emb) {
                *acc += *x as f64;
            }
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }

    let mean = sum.iter().map(|v| (v / count as f64) as f32).collect();
    Some((mean, count))
}

/// Actor vectors keyed by 1-based sequence index.
///
/// A sequence is skipped, never zero-filled, when fewer than
/// `min_surviving_entities` of its entities have item vectors or when its
/// mean is not finite. Skips are returned alongside the map.
pub fn aggregate(
    corpus: &Corpus,
    item_vectors: &VectorMap,
    min_surviving_entities: usize,
) -> AggregateOutcome {
    let mut vectors = VectorMap::with_capacity(item_vectors.dimension(), corpus.len());
    let mut skipped = Vec::new();

    for (i, seq) in corpus.iter().enumerate() {
        let index = i + 1;
        let items = seq.items.iter().map(String::as_str);
        let reason = match mean_vector(items, item_vectors) {
            Some((mean, surviving)) if surviving >= min_surviving_entities => {
                match mean.iter().position(|x| !x.is_finite()) {
                    None => {
                        // Dimension comes from item_vectors, so this cannot fail.
                        if let Err(e) = vectors.insert(index.to_string(), &mean) {
                            warn!(index, actor = %seq.actor_id, error = %e, "actor vector rejected");
                        }
                        continue;
                    }
                    Some(component) => SkipReason::NonFinite { component },
                }
            }
            Some((_, surviving)) => SkipReason::TooFewEntities {
                surviving,
                required: min_surviving_entities,
            },
            None => SkipReason::TooFewEntities {
                surviving: 0,
                required: min_surviving_entities,
            },
        };

        match &reason {
            SkipReason::TooFewEntities { .. } => {
                debug!(index, actor = %seq.actor_id, %reason, "actor skipped")
            }
            SkipReason::NonFinite { .. } => {
                warn!(index, actor = %seq.actor_id, %reason, "actor vector failed")
            }
        }
        skipped.push(AggregationFailure {
            index,
            actor_id: seq.actor_id.clone(),
            reason,
        });
    }

    info!(
        actors = corpus.len(),
        vectors = vectors.len(),
        skipped = skipped.len(),
        "aggregated actor vectors"
    );
    AggregateOutcome { vectors, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sequence;

    fn items() -> VectorMap {
        let mut map = VectorMap::new(3);
        map.insert("a", &[1.0, 2.0, 3.0]).unwrap();
        map.insert("b", &[3.0, 4.0, 5.0]).unwrap();
        map.insert("c", &[5.0, 0.0, -2.0]).unwrap();
        map.insert("d", &[0.5, 0.5, 0.5]).unwrap();
        map
    }

    fn corpus(rows: &[&[&str]]) -> Corpus {
        Corpus::new(
            rows.iter()
                .enumerate()
                .map(|(i, r)| Sequence {
                    actor_id: format!("u{}", i),
                    items: r.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_mean_of_three_known_vectors() {
        let outcome = aggregate(&corpus(&[&["a", "b", "c"]]), &items(), 3);
        assert_eq!(outcome.vectors.len(), 1);
        assert_eq!(outcome.vectors.get("1"), Some(&[3.0, 2.0, 2.0][..]));
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_two_survivors_below_threshold_is_omitted() {
        let outcome = aggregate(&corpus(&[&["a", "zz", "b", "yy"]]), &items(), 3);
        assert!(outcome.vectors.is_empty());
        assert_eq!(outcome.too_few_count(), 1);
        assert_eq!(
            outcome.skipped[0].reason,
            SkipReason::TooFewEntities {
                surviving: 2,
                required: 3
            }
        );
    }

    #[test]
    fn test_ids_follow_corpus_positions() {
        let outcome = aggregate(
            &corpus(&[&["a", "b", "c"], &["zz"], &["b", "c", "d", "d"]]),
            &items(),
            3,
        );
        assert_eq!(outcome.vectors.ids().collect::<Vec<_>>(), vec!["1", "3"]);
        assert_eq!(outcome.skipped[0].index, 2);
        assert_eq!(outcome.skipped[0].actor_id, "u1");
        assert_eq!(outcome.vectors.dimension(), 3);
    }

    #[test]
    fn test_repeated_entities_weigh_each_occurrence() {
        let outcome = aggregate(&corpus(&[&["a", "a", "b"]]), &items(), 3);
        let v = outcome.vectors.get("1").unwrap();
        assert!((v[0] - 5.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_mean_is_a_failure_not_an_abort() {
        let mut map = items();
        map.insert("bad", &[f32::NAN, 0.0, 0.0]).unwrap();
        let outcome = aggregate(&corpus(&[&["a", "b", "bad"], &["a", "b", "c"]]), &map, 3);

        assert_eq!(outcome.vectors.ids().collect::<Vec<_>>(), vec!["2"]);
        assert_eq!(outcome.failure_count(), 1);
        assert_eq!(
            outcome.skipped[0].reason,
            SkipReason::NonFinite { component: 0 }
        );
    }

    #[test]
    fn test_mean_vector_empty() {
        assert_eq!(mean_vector(["nope"], &items()), None);
    }
}
