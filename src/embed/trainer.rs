//! Skip-gram with negative sampling over entity sequences.
//!
//! Each sequence is a sentence and each entity id a word. For every position
//! the vectors of the surrounding entities (within a randomly shrunk window)
//! are trained to predict the centre entity against `negative_samples`
//! entities drawn from the unigram^0.75 distribution.
//!
//! Workers share the two weight matrices without locks (Hogwild). With one
//! worker the run is a pure function of corpus, parameters and seed; with more
//! the interleaving of updates varies but the vocabulary does not.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use tracing::{debug, info};

use crate::{
    config::TrainParams,
    data::Corpus,
    embed::vector_map::VectorMap,
    errors::{EmbedError, Result},
};

const EXP_TABLE_SIZE: usize = 1000;
const MAX_EXP: f32 = 6.0;
const NEG_TABLE_DOMAIN: f64 = 2_147_483_647.0;

/// Precomputed sigmoid over [-MAX_EXP, MAX_EXP).
static EXP_TABLE: Lazy<Vec<f32>> = Lazy::new(|| {
    (0..EXP_TABLE_SIZE)
        .map(|i| {
            let x = (i as f32 / EXP_TABLE_SIZE as f32 * 2.0 - 1.0) * MAX_EXP;
            let e = x.exp();
            e / (e + 1.0)
        })
        .collect()
});

/// Anything that can turn a corpus into entity vectors.
pub trait EmbeddingTrainer {
    fn train(&self, corpus: &Corpus) -> Result<VectorMap>;
}

/// Train with the default skip-gram implementation.
pub fn train(corpus: &Corpus, params: &TrainParams) -> Result<VectorMap> {
    SkipGram::new(params.clone())?.train(corpus)
}

#[derive(Debug, Clone)]
pub struct SkipGram {
    params: TrainParams,
}

impl SkipGram {
    pub fn new(params: TrainParams) -> Result<Self> {
        params.validate().map_err(EmbedError::InvalidConfig)?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &TrainParams {
        &self.params
    }
}

impl EmbeddingTrainer for SkipGram {
    fn train(&self, corpus: &Corpus) -> Result<VectorMap> {
        let p = &self.params;
        let pool = ThreadPoolBuilder::new().num_threads(p.parallelism).build()?;

        let vocab = Vocab::build(corpus, p.min_frequency, &pool)?;
        let sentences = vocab.encode(corpus);
        let words_per_epoch: u64 = sentences.iter().map(|s| s.len() as u64).sum();
        info!(
            vocab = vocab.len(),
            dropped = vocab.dropped,
            sentences = sentences.len(),
            words_per_epoch,
            "vocabulary built"
        );

        let model = Model::new(&vocab, p);
        let total_words = (words_per_epoch * p.epochs as u64).max(1);
        let processed = AtomicU64::new(0);
        let chunks = split_even(sentences.len(), p.parallelism);

        for epoch in 0..p.epochs {
            pool.scope(|s| {
                for (worker, range) in chunks.iter().enumerate() {
                    let model = &model;
                    let processed = &processed;
                    let sentences = &sentences[range.clone()];
                    s.spawn(move |_| {
                        let mut rng = ChaCha8Rng::seed_from_u64(worker_seed(p.seed, epoch, worker));
                        let mut scratch = Scratch::new(model.dim);
                        for sentence in sentences {
                            let done = processed.load(Ordering::Relaxed);
                            let alpha = model.alpha_at(done, total_words);
                            model.train_sentence(sentence, alpha, &mut rng, &mut scratch);
                            processed.fetch_add(sentence.len() as u64, Ordering::Relaxed);
                        }
                    });
                }
            });
            debug!(epoch = epoch + 1, epochs = p.epochs, "epoch finished");
        }

        let weights = model.syn0.to_vec();
        let mut map = VectorMap::with_capacity(p.dimension, vocab.len());
        for (row, word) in vocab.words.iter().enumerate() {
            map.insert(word.as_str(), &weights[row * p.dimension..(row + 1) * p.dimension])?;
        }
        Ok(map)
    }
}

/// Post-cutoff vocabulary, most frequent first, ties by id.
struct Vocab {
    words: Vec<String>,
    counts: Vec<u64>,
    index: HashMap<String, u32>,
    dropped: usize,
}

impl Vocab {
    fn build(corpus: &Corpus, min_frequency: usize, pool: &ThreadPool) -> Result<Self> {
        let counts: DashMap<&str, u64> = DashMap::new();
        pool.install(|| {
            corpus.sequences.par_iter().for_each(|seq| {
                for item in &seq.items {
                    *counts.entry(item.as_str()).or_insert(0) += 1;
                }
            })
        });

        let distinct = counts.len();
        let mut kept: Vec<(&str, u64)> = counts
            .into_iter()
            .filter(|(_, n)| *n >= min_frequency as u64)
            .collect();
        if kept.is_empty() {
            return Err(EmbedError::EmptyVocabulary {
                min_frequency,
                distinct,
            });
        }
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut vocab = Vocab {
            words: Vec::with_capacity(kept.len()),
            counts: Vec::with_capacity(kept.len()),
            index: HashMap::with_capacity(kept.len()),
            dropped: distinct - kept.len(),
        };
        for (row, (word, n)) in kept.into_iter().enumerate() {
            vocab.index.insert(word.to_string(), row as u32);
            vocab.words.push(word.to_string());
            vocab.counts.push(n);
        }
        Ok(vocab)
    }

    fn len(&self) -> usize {
        self.words.len()
    }

    /// Sequences as vocabulary rows, out-of-vocabulary entities removed.
    fn encode(&self, corpus: &Corpus) -> Vec<Vec<u32>> {
        corpus
            .iter()
            .map(|seq| {
                seq.items
                    .iter()
                    .filter_map(|item| self.index.get(item.as_str()).copied())
                    .collect::<Vec<u32>>()
            })
            .filter(|s| s.len() > 1)
            .collect()
    }
}

/// Row-major f32 matrix shared between workers without locking.
struct SharedMatrix {
    cells: Vec<AtomicU32>,
    dim: usize,
}

impl SharedMatrix {
    fn from_values(values: Vec<f32>, dim: usize) -> Self {
        Self {
            cells: values.into_iter().map(|v| AtomicU32::new(v.to_bits())).collect(),
            dim,
        }
    }

    #[inline]
    fn load(&self, row: usize, out: &mut [f32]) {
        let cells = &self.cells[row * self.dim..(row + 1) * self.dim];
        for (o, c) in out.iter_mut().zip(cells) {
            *o = f32::from_bits(c.load(Ordering::Relaxed));
        }
    }

    #[inline]
    fn store(&self, row: usize, values: &[f32]) {
        let cells = &self.cells[row * self.dim..(row + 1) * self.dim];
        for (c, v) in cells.iter().zip(values) {
            c.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    #[inline]
    fn add(&self, row: usize, delta: &[f32]) {
        let cells = &self.cells[row * self.dim..(row + 1) * self.dim];
        for (c, d) in cells.iter().zip(delta) {
            let v = f32::from_bits(c.load(Ordering::Relaxed)) + d;
            c.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    fn to_vec(&self) -> Vec<f32> {
        self.cells
            .iter()
            .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
            .collect()
    }
}

struct Scratch {
    l1: Vec<f32>,
    l2: Vec<f32>,
    neu1e: Vec<f32>,
    kept: Vec<u32>,
}

impl Scratch {
    fn new(dim: usize) -> Self {
        Self {
            l1: vec![0.0; dim],
            l2: vec![0.0; dim],
            neu1e: vec![0.0; dim],
            kept: Vec::new(),
        }
    }
}

struct Model {
    syn0: SharedMatrix,
    syn1neg: SharedMatrix,
    cum_table: Vec<u64>,
    keep_threshold: Vec<u64>, // keep a token when a u32 draw is <= this
    dim: usize,
    window: usize,
    negative: usize,
    alpha: f32,
    min_alpha: f32,
}

impl Model {
    fn new(vocab: &Vocab, p: &TrainParams) -> Self {
        let dim = p.dimension;
        let mut rng = ChaCha8Rng::seed_from_u64(p.seed);
        let syn0: Vec<f32> = (0..vocab.len() * dim)
            .map(|_| (rng.gen::<f32>() - 0.5) / dim as f32)
            .collect();

        Self {
            syn0: SharedMatrix::from_values(syn0, dim),
            syn1neg: SharedMatrix::from_values(vec![0.0; vocab.len() * dim], dim),
            cum_table: cum_table(&vocab.counts),
            keep_threshold: keep_thresholds(&vocab.counts, p.sample),
            dim,
            window: p.window_size,
            negative: p.negative_samples,
            alpha: p.alpha,
            min_alpha: p.min_alpha,
        }
    }

    fn alpha_at(&self, done: u64, total: u64) -> f32 {
        let progress = (done as f64 / total as f64).min(1.0) as f32;
        (self.alpha - (self.alpha - self.min_alpha) * progress).max(self.min_alpha)
    }

    fn draw_negative(&self, rng: &mut ChaCha8Rng) -> u32 {
        let last = *self.cum_table.last().unwrap_or(&1);
        let r = rng.gen_range(0..last.max(1));
        self.cum_table.partition_point(|&c| c <= r) as u32
    }

    fn train_sentence(&self, sentence: &[u32], alpha: f32, rng: &mut ChaCha8Rng, s: &mut Scratch) {
        s.kept.clear();
        for &word in sentence {
            if self.keep_threshold[word as usize] >= rng.gen::<u32>() as u64 {
                s.kept.push(word);
            }
        }

        let len = s.kept.len();
        for pos in 0..len {
            let reduced = self.window - rng.gen_range(0..self.window);
            let start = pos.saturating_sub(reduced);
            let end = (pos + reduced + 1).min(len);
            let word = s.kept[pos];
            for ctx_pos in start..end {
                if ctx_pos == pos {
                    continue;
                }
                let context = s.kept[ctx_pos];
                self.train_pair(word, context, alpha, rng, &mut s.l1, &mut s.l2, &mut s.neu1e);
            }
        }
    }

    /// One positive pair plus its negatives: `context`'s input vector
    /// predicts `word`.
    #[allow(clippy::too_many_arguments)]
    fn train_pair(
        &self,
        word: u32,
        context: u32,
        alpha: f32,
        rng: &mut ChaCha8Rng,
        l1: &mut [f32],
        l2: &mut [f32],
        neu1e: &mut [f32],
    ) {
        self.syn0.load(context as usize, l1);
        neu1e.fill(0.0);

        for d in 0..=self.negative {
            let (target, label) = if d == 0 {
                (word, 1.0f32)
            } else {
                let neg = self.draw_negative(rng);
                if neg == word {
                    continue;
                }
                (neg, 0.0f32)
            };

            self.syn1neg.load(target as usize, l2);
            let f: f32 = l1.iter().zip(l2.iter()).map(|(a, b)| a * b).sum();
            let g = (label - sigmoid(f)) * alpha;

            for i in 0..self.dim {
                neu1e[i] += g * l2[i];
                l2[i] += g * l1[i];
            }
            self.syn1neg.store(target as usize, l2);
        }

        self.syn0.add(context as usize, neu1e);
    }
}

#[inline]
fn sigmoid(f: f32) -> f32 {
    if f >= MAX_EXP {
        1.0
    } else if f <= -MAX_EXP {
        0.0
    } else {
        let idx = ((f + MAX_EXP) * (EXP_TABLE_SIZE as f32 / MAX_EXP / 2.0)) as usize;
        EXP_TABLE[idx.min(EXP_TABLE_SIZE - 1)]
    }
}

/// Cumulative unigram^0.75 table scaled to a fixed integer domain.
fn cum_table(counts: &[u64]) -> Vec<u64> {
    let total: f64 = counts.iter().map(|&c| (c as f64).powf(0.75)).sum();
    let mut cumulative = 0.0;
    counts
        .iter()
        .map(|&c| {
            cumulative += (c as f64).powf(0.75);
            (cumulative / total * NEG_TABLE_DOMAIN).round() as u64
        })
        .collect()
}

/// Per-entity keep thresholds for frequent-token subsampling, on a u32 scale.
fn keep_thresholds(counts: &[u64], sample: f64) -> Vec<u64> {
    let full = u32::MAX as u64 + 1;
    if sample <= 0.0 {
        return vec![full; counts.len()];
    }
    let total: u64 = counts.iter().sum();
    let threshold = if sample < 1.0 {
        sample * total as f64
    } else {
        sample
    };
    counts
        .iter()
        .map(|&c| {
            let c = c as f64;
            let p = ((c / threshold).sqrt() + 1.0) * (threshold / c);
            (p.min(1.0) * full as f64).round() as u64
        })
        .collect()
}

fn worker_seed(seed: u64, epoch: usize, worker: usize) -> u64 {
    seed ^ (epoch as u64)
        .wrapping_add(1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((worker as u64).wrapping_mul(0x517C_C1B7_2722_0A95))
}

/// `parts` contiguous ranges covering `0..len`, sizes differing by at most one.
fn split_even(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1).min(len.max(1));
    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sequence;
    use std::collections::HashSet;

    fn params(dimension: usize, min_frequency: usize, parallelism: usize) -> TrainParams {
        TrainParams {
            dimension,
            window_size: 2,
            min_frequency,
            negative_samples: 3,
            epochs: 5,
            parallelism,
            seed: 42,
            ..TrainParams::default()
        }
    }

    fn corpus(rows: &[&[&str]]) -> Corpus {
        Corpus::new(
            rows.iter()
                .enumerate()
                .map(|(i, items)| Sequence {
                    actor_id: i.to_string(),
                    items: items.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
        )
    }

    fn small_corpus() -> Corpus {
        corpus(&[
            &["1", "2", "3", "4", "5"],
            &["2", "3", "1", "6"],
            &["5", "4", "3", "2", "1", "7"],
            &["1", "3", "5"],
            &["6", "2", "4", "1"],
        ])
    }

    fn keys(map: &VectorMap) -> HashSet<String> {
        map.ids().map(str::to_string).collect()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb).max(1e-8)
    }

    #[test]
    fn test_single_worker_is_reproducible() {
        let corpus = small_corpus();
        let first = train(&corpus, &params(8, 1, 1)).unwrap();
        let second = train(&corpus, &params(8, 1, 1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_seed_changes_vectors() {
        let corpus = small_corpus();
        let a = train(&corpus, &params(8, 1, 1)).unwrap();
        let mut other = params(8, 1, 1);
        other.seed = 43;
        let b = train(&corpus, &other).unwrap();
        assert_eq!(keys(&a), keys(&b));
        assert_ne!(a.get("1"), b.get("1"));
    }

    #[test]
    fn test_vocabulary_independent_of_parallelism() {
        let corpus = small_corpus();
        let serial = train(&corpus, &params(8, 2, 1)).unwrap();
        let parallel = train(&corpus, &params(8, 2, 4)).unwrap();
        assert_eq!(keys(&serial), keys(&parallel));
        assert_eq!(
            serial.ids().collect::<Vec<_>>(),
            parallel.ids().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_raising_min_frequency_shrinks_vocabulary() {
        let corpus = small_corpus();
        let mut previous: Option<HashSet<String>> = None;
        for min_frequency in 1..=4 {
            let current = keys(&train(&corpus, &params(4, min_frequency, 1)).unwrap());
            if let Some(prev) = &previous {
                assert!(current.is_subset(prev), "min_frequency={}", min_frequency);
            }
            previous = Some(current);
        }
    }

    #[test]
    fn test_vectors_have_requested_dimension() {
        let map = train(&small_corpus(), &params(12, 1, 2)).unwrap();
        assert_eq!(map.dimension(), 12);
        for (_, v) in map.iter() {
            assert_eq!(v.len(), 12);
            assert!(v.iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_vocabulary_order_is_frequency_then_id() {
        let map = train(&small_corpus(), &params(4, 3, 1)).unwrap();
        // counts: 1→5, 2→4, 3→4, 4→3, 5→3
        assert_eq!(map.ids().collect::<Vec<_>>(), vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_single_sequence_vocabulary_is_its_distinct_ids() {
        let corpus = corpus(&[&["m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8"]]);
        let map = train(&corpus, &params(8, 1, 1)).unwrap();
        let expected: HashSet<String> = (1..=8).map(|i| format!("m{}", i)).collect();
        assert_eq!(keys(&map), expected);
    }

    #[test]
    fn test_empty_vocabulary_is_an_error() {
        let err = train(&small_corpus(), &params(4, 100, 1)).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::EmptyVocabulary {
                min_frequency: 100,
                distinct: 7
            }
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(matches!(
            SkipGram::new(params(0, 1, 1)),
            Err(EmbedError::InvalidConfig(_))
        ));
        assert!(SkipGram::new(params(4, 1, 0)).is_err());
    }

    #[test]
    fn test_clusters_separate() {
        let mut rows: Vec<Vec<&str>> = Vec::new();
        let left = ["a", "b", "c", "d"];
        let right = ["w", "x", "y", "z"];
        for i in 0..60 {
            let group = if i % 2 == 0 { &left } else { &right };
            let rot = i % 4;
            rows.push((0..8).map(|j| group[(j + rot) % 4]).collect());
        }
        let refs: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
        let corpus = corpus(&refs);

        let mut p = params(16, 1, 1);
        p.epochs = 30;
        p.sample = 0.0;
        let map = train(&corpus, &p).unwrap();

        let mut within = 0.0;
        let mut across = 0.0;
        for i in 0..4 {
            for j in 0..4 {
                if i != j {
                    within += cosine(map.get(left[i]).unwrap(), map.get(left[j]).unwrap());
                }
                across += cosine(map.get(left[i]).unwrap(), map.get(right[j]).unwrap());
            }
        }
        assert!(within / 12.0 > across / 16.0);
    }

    #[test]
    fn test_sigmoid_table() {
        assert!((sigmoid(0.0) - 0.5).abs() < 0.01);
        assert_eq!(sigmoid(10.0), 1.0);
        assert_eq!(sigmoid(-10.0), 0.0);
        assert!(sigmoid(2.0) > sigmoid(1.0));
    }

    #[test]
    fn test_cum_table_draws_stay_in_vocab() {
        let table = cum_table(&[10, 1, 1]);
        assert_eq!(table.len(), 3);
        assert_eq!(*table.last().unwrap(), NEG_TABLE_DOMAIN as u64);
        assert!(table[0] > table[1] - table[0]);
    }

    #[test]
    fn test_keep_thresholds() {
        let all = keep_thresholds(&[100, 1], 0.0);
        assert_eq!(all, vec![1u64 << 32, 1u64 << 32]);

        let sampled = keep_thresholds(&[1000, 1], 1e-3);
        assert!(sampled[0] < sampled[1]);
        assert_eq!(sampled[1], 1u64 << 32);
    }

    #[test]
    fn test_split_even() {
        assert_eq!(split_even(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(split_even(2, 4), vec![0..1, 1..2]);
        assert_eq!(split_even(0, 4), vec![0..0]);
    }
}
