use std::collections::HashSet;

use bincode::{
    Decode, Encode,
    config::{self},
};

use crate::errors::Result;

/// One actor's time-ordered positive interactions.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Sequence {
    pub actor_id: String,
    pub items: Vec<String>, // entity ids, timestamp non-decreasing
}

impl Sequence {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// All sequences of one run, in actor processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Corpus {
    pub sequences: Vec<Sequence>,
}

impl Corpus {
    pub fn new(sequences: Vec<Sequence>) -> Self {
        Self { sequences }
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sequence> {
        self.sequences.iter()
    }

    /// Total number of entity occurrences over all sequences.
    pub fn token_count(&self) -> usize {
        self.sequences.iter().map(Sequence::len).sum()
    }

    pub fn distinct_entities(&self) -> HashSet<&str> {
        self.sequences
            .iter()
            .flat_map(|s| s.items.iter().map(String::as_str))
            .collect()
    }

    /// Encode the corpus to a byte vector using bincode
    pub fn encode(&self) -> Result<Vec<u8>> {
        let config = config::standard();
        let encoded: Vec<u8> = bincode::encode_to_vec(self, config)?;

        Ok(encoded)
    }

    /// Decode a corpus from a byte slice
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let config = config::standard();
        let (decoded, _): (Self, _) = bincode::decode_from_slice(bytes, config)?;

        Ok(decoded)
    }
}

impl<'a> IntoIterator for &'a Corpus {
    type Item = &'a Sequence;
    type IntoIter = std::slice::Iter<'a, Sequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.iter()
    }
}
