use std::collections::HashMap;

use crate::errors::{EmbedError, Result};

/// Insertion-ordered `id -> vector` map with one fixed dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMap {
    dimension: usize,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    data: Vec<f32>, // row-major, ids.len() * dimension
}

impl VectorMap {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            index: HashMap::new(),
            data: Vec::new(),
        }
    }

    pub fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            ids: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            data: Vec::with_capacity(capacity * dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Insert or replace. A replaced entry keeps its original position.
    pub fn insert(&mut self, id: impl Into<String>, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(EmbedError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let id = id.into();
        if let Some(&row) = self.index.get(&id) {
            let start = row * self.dimension;
            self.data[start..start + self.dimension].copy_from_slice(vector);
            return Ok(());
        }
        self.index.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.index.get(id).map(|&row| self.row(row))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.ids
            .iter()
            .enumerate()
            .map(move |(row, id)| (id.as_str(), self.row(row)))
    }

    /// Entries whose id appears in `order`, in that order. Unknown and
    /// repeated ids are skipped.
    pub fn reordered<'a>(&self, order: impl IntoIterator<Item = &'a str>) -> VectorMap {
        let mut out = VectorMap::new(self.dimension);
        for id in order {
            if out.contains(id) {
                continue;
            }
            if let Some(row) = self.index.get(id) {
                out.index.insert(id.to_string(), out.ids.len());
                out.ids.push(id.to_string());
                out.data.extend_from_slice(self.row(*row));
            }
        }
        out
    }

    fn row(&self, row: usize) -> &[f32] {
        let start = row * self.dimension;
        &self.data[start..start + self.dimension]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_order() {
        let mut map = VectorMap::new(2);
        map.insert("b", &[1.0, 2.0]).unwrap();
        map.insert("a", &[3.0, 4.0]).unwrap();

        assert_eq!(map.ids().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get("a"), Some(&[3.0, 4.0][..]));
        assert_eq!(map.get("c"), None);
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() {
        let mut map = VectorMap::new(3);
        let err = map.insert("x", &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::InvalidDimension {
                expected: 3,
                actual: 1
            }
        ));
        assert!(map.is_empty());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut map = VectorMap::new(1);
        map.insert("x", &[1.0]).unwrap();
        map.insert("y", &[2.0]).unwrap();
        map.insert("x", &[9.0]).unwrap();

        let entries: Vec<_> = map.iter().collect();
        assert_eq!(entries, vec![("x", &[9.0][..]), ("y", &[2.0][..])]);
    }

    #[test]
    fn test_reordered_skips_unknown() {
        let mut map = VectorMap::new(1);
        map.insert("1", &[1.0]).unwrap();
        map.insert("2", &[2.0]).unwrap();
        map.insert("3", &[3.0]).unwrap();

        let out = map.reordered(["3", "9", "1", "3"]);
        assert_eq!(out.ids().collect::<Vec<_>>(), vec!["3", "1"]);
        assert_eq!(out.dimension(), 1);
    }
}
