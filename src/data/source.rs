use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::info;

use crate::errors::Result;

/// A single interaction: `actor_id` scored `entity_id` at `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub actor_id: String,
    pub entity_id: String,
    pub score: f64,
    pub timestamp: i64,
}

impl Event {
    pub fn new(
        actor_id: impl Into<String>,
        entity_id: impl Into<String>,
        score: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            entity_id: entity_id.into(),
            score,
            timestamp,
        }
    }
}

/// Where interaction rows and the entity catalog come from.
pub trait EventSource {
    /// All interaction rows, in source order.
    fn events(&self) -> Result<Vec<Event>>;

    /// Every known entity id, in catalog order. May be empty when no catalog
    /// is available.
    fn catalog(&self) -> Result<Vec<String>>;

    /// Where the rows come from, for error context.
    fn describe(&self) -> String;
}

/// In-memory source, mostly for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub events: Vec<Event>,
    pub catalog: Vec<String>,
}

impl MemorySource {
    pub fn new(events: Vec<Event>, catalog: Vec<String>) -> Self {
        Self { events, catalog }
    }
}

impl EventSource for MemorySource {
    fn events(&self) -> Result<Vec<Event>> {
        Ok(self.events.clone())
    }

    fn catalog(&self) -> Result<Vec<String>> {
        Ok(self.catalog.clone())
    }

    fn describe(&self) -> String {
        format!(
            "memory: {} events, {} catalog entries",
            self.events.len(),
            self.catalog.len()
        )
    }
}

#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(rename = "userId", alias = "actorId")]
    actor_id: String,
    #[serde(rename = "movieId", alias = "entityId")]
    entity_id: String,
    #[serde(rename = "rating", alias = "score")]
    score: f64,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(rename = "movieId", alias = "entityId")]
    entity_id: String,
}

/// Headered CSV files: a ratings-style event log and an optional catalog.
///
/// Event columns: `userId|actorId, movieId|entityId, rating|score, timestamp`.
/// Catalog columns: `movieId|entityId`, extra columns ignored.
#[derive(Debug, Clone)]
pub struct CsvSource {
    events_path: PathBuf,
    catalog_path: Option<PathBuf>,
}

impl CsvSource {
    pub fn new(events_path: impl Into<PathBuf>, catalog_path: Option<PathBuf>) -> Self {
        Self {
            events_path: events_path.into(),
            catalog_path,
        }
    }

    fn reader(path: &Path) -> Result<csv::Reader<BufReader<File>>> {
        let file = File::open(path)?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file)))
    }
}

impl EventSource for CsvSource {
    fn events(&self) -> Result<Vec<Event>> {
        let mut reader = Self::reader(&self.events_path)?;
        let mut events = Vec::new();
        for row in reader.deserialize::<EventRow>() {
            let row = row?;
            events.push(Event {
                actor_id: row.actor_id,
                entity_id: row.entity_id,
                score: row.score,
                timestamp: row.timestamp,
            });
        }
        info!(path = %self.events_path.display(), rows = events.len(), "loaded events");
        Ok(events)
    }

    fn catalog(&self) -> Result<Vec<String>> {
        let Some(path) = &self.catalog_path else {
            return Ok(Vec::new());
        };
        let mut reader = Self::reader(path)?;
        let mut ids = Vec::new();
        for row in reader.deserialize::<CatalogRow>() {
            ids.push(row?.entity_id);
        }
        info!(path = %path.display(), entities = ids.len(), "loaded catalog");
        Ok(ids)
    }

    fn describe(&self) -> String {
        match &self.catalog_path {
            Some(catalog) => format!(
                "events={}, catalog={}",
                self.events_path.display(),
                catalog.display()
            ),
            None => format!("events={}, catalog=none", self.events_path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempdir::TempDir;

    #[test]
    fn test_csv_source_reads_movielens_headers() {
        let dir = TempDir::new("csv_source").expect("Failed to create temp dir");
        let ratings = dir.path().join("ratings.csv");
        let movies = dir.path().join("movies.csv");

        let mut f = File::create(&ratings).unwrap();
        writeln!(f, "userId,movieId,rating,timestamp").unwrap();
        writeln!(f, "1,31,2.5,1260759144").unwrap();
        writeln!(f, "1,1029,3.0,1260759179").unwrap();

        let mut f = File::create(&movies).unwrap();
        writeln!(f, "movieId,title,genres").unwrap();
        writeln!(f, "31,\"Dangerous Minds (1995)\",Drama").unwrap();
        writeln!(f, "1029,\"Dumbo, the Flying Elephant (1941)\",Animation").unwrap();

        let source = CsvSource::new(&ratings, Some(movies));
        let events = source.events().expect("events");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::new("1", "31", 2.5, 1_260_759_144));

        let catalog = source.catalog().expect("catalog");
        assert_eq!(catalog, vec!["31".to_string(), "1029".to_string()]);
    }

    #[test]
    fn test_csv_source_accepts_generic_headers() {
        let dir = TempDir::new("csv_generic").unwrap();
        let path = dir.path().join("events.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "actorId,entityId,score,timestamp").unwrap();
        writeln!(f, "u9,item-3,4.5,10").unwrap();

        let source = CsvSource::new(&path, None);
        assert_eq!(source.events().unwrap()[0].entity_id, "item-3");
        assert!(source.catalog().unwrap().is_empty());
        assert!(source.describe().ends_with("events.csv, catalog=none"));
    }

    #[test]
    fn test_csv_source_rejects_bad_score() {
        let dir = TempDir::new("csv_bad").unwrap();
        let path = dir.path().join("events.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "userId,movieId,rating,timestamp").unwrap();
        writeln!(f, "1,2,high,3").unwrap();

        let source = CsvSource::new(&path, None);
        assert!(source.events().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = CsvSource::new("/nonexistent/ratings.csv", None);
        assert!(matches!(
            source.events(),
            Err(crate::errors::EmbedError::Io(_))
        ));
    }
}
