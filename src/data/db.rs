use std::path::Path;

use bincode::{
    Decode, Encode,
    config::{self},
};
use rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch};
use tracing::{debug, warn};
use xxhash_rust::xxh64::{Xxh64, xxh64};

use crate::{
    config::SequenceParams,
    data::{corpus::Corpus, source::Event},
    errors::Result,
};

const KEY_PREFIX: &str = "corpus:";

// Configure RocksDB options
fn rocksdb_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts
}

/// Everything a cached corpus depends on.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CacheScope {
    pub params: SequenceParams,
    pub event_count: u64,
    pub event_digest: u64, // xxh64 over every event row, in source order
}

impl CacheScope {
    pub fn new(params: &SequenceParams, events: &[Event]) -> Self {
        let mut hasher = Xxh64::new(0);
        for event in events {
            hasher.update(event.actor_id.as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(event.entity_id.as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(&event.score.to_bits().to_le_bytes());
            hasher.update(&event.timestamp.to_le_bytes());
        }
        Self {
            params: params.clone(),
            event_count: events.len() as u64,
            event_digest: hasher.digest(),
        }
    }

    pub fn fingerprint(&self) -> Result<u64> {
        let bytes = bincode::encode_to_vec(self, config::standard())?;
        Ok(xxh64(&bytes, 0))
    }

    pub fn key(&self) -> Result<String> {
        Ok(format!("{}{:016x}", KEY_PREFIX, self.fingerprint()?))
    }
}

#[derive(Debug, Encode, Decode)]
struct CacheRecord {
    scope: CacheScope,
    corpus: Corpus,
}

/// Persisted corpora keyed by [`CacheScope`] fingerprint.
///
/// One process at a time: RocksDB's lock file makes a second opener of the
/// same path fail.
pub struct CorpusCache {
    db: DB,
}

impl CorpusCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = DB::open(&rocksdb_options(), path.as_ref())?;
        Ok(Self { db })
    }

    pub fn contains(&self, scope: &CacheScope) -> Result<bool> {
        let key = scope.key()?;
        Ok(self.db.get_pinned(key.as_bytes())?.is_some())
    }

    /// Load the corpus cached for `scope`. Undecodable or mismatching records
    /// count as a miss.
    pub fn load(&self, scope: &CacheScope) -> Result<Option<Corpus>> {
        let key = scope.key()?;
        let Some(value) = self.db.get(key.as_bytes())? else {
            debug!(%key, "corpus cache miss");
            return Ok(None);
        };

        let record: CacheRecord = match bincode::decode_from_slice(&value, config::standard()) {
            Ok((record, _)) => record,
            Err(e) => {
                warn!(%key, error = %e, "discarding undecodable corpus cache record");
                return Ok(None);
            }
        };

        if record.scope != *scope {
            warn!(%key, "corpus cache record scope mismatch, ignoring");
            return Ok(None);
        }

        Ok(Some(record.corpus))
    }

    pub fn store(&self, scope: &CacheScope, corpus: &Corpus) -> Result<()> {
        let key = scope.key()?;
        let record = CacheRecord {
            scope: scope.clone(),
            corpus: corpus.clone(),
        };
        let value = bincode::encode_to_vec(&record, config::standard())?;

        // Older scopes are dropped in the same write.
        let mut batch = WriteBatch::default();
        let mut evicted = 0;
        for stale in self.keys()? {
            if stale.as_slice() != key.as_bytes() {
                batch.delete(&stale);
                evicted += 1;
            }
        }
        batch.put(key.as_bytes(), &value);
        self.db.write(batch)?;

        debug!(%key, bytes = value.len(), evicted, "stored corpus cache record");
        Ok(())
    }

    /// Every corpus record key currently in the cache.
    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let mode = IteratorMode::From(KEY_PREFIX.as_bytes(), Direction::Forward);
        let mut keys = Vec::new();
        for item in self.db.iterator(mode) {
            let (key, _) = item?;
            if !key.starts_with(KEY_PREFIX.as_bytes()) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}
