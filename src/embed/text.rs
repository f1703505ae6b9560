//! The flat embedding file format.
//!
//! One entry per line, `id:c1 c2 ... cD`, lines joined with `\n`, no header
//! and no newline after the last line. Components use Rust's shortest
//! round-trip `f32` formatting.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use tracing::{error, info};

use crate::{
    embed::vector_map::VectorMap,
    errors::{EmbedError, Result},
};

/// What [`verify`] found in a written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSummary {
    pub line_count: usize,
    /// `None` for an empty file.
    pub first_entry_dimension: Option<usize>,
}

/// Format a single entry line, without the newline.
pub fn format_line(id: &str, vector: &[f32]) -> String {
    let mut line = String::with_capacity(id.len() + 1 + vector.len() * 12);
    line.push_str(id);
    line.push(':');
    for (i, x) in vector.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&x.to_string());
    }
    line
}

/// Write `map` to `path`, replacing any existing file.
pub fn write(map: &VectorMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut out = BufWriter::new(File::create(path)?);
    for (i, (id, vector)) in map.iter().enumerate() {
        if i > 0 {
            out.write_all(b"\n")?;
        }
        out.write_all(format_line(id, vector).as_bytes())?;
    }
    out.flush()?;

    info!(path = %path.display(), entries = map.len(), "wrote embeddings");
    Ok(())
}

/// Split a line into id and components.
pub fn parse_line(line: &str) -> std::result::Result<(&str, Vec<f32>), String> {
    let mut parts = line.split(':');
    let (Some(id), Some(body), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err("expected exactly one ':' separating id and vector".into());
    };
    if id.is_empty() {
        return Err("empty id".into());
    }
    let vector = body
        .split_whitespace()
        .map(|x| x.parse::<f32>().map_err(|e| format!("bad component '{}': {}", x, e)))
        .collect::<std::result::Result<Vec<f32>, String>>()?;
    Ok((id, vector))
}

/// Read a file written by [`write`] back into a map.
pub fn read(path: impl AsRef<Path>) -> Result<VectorMap> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut map: Option<VectorMap> = None;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let (id, vector) = parse_line(&line).map_err(|message| EmbedError::FormatMismatch {
            path: path.display().to_string(),
            message: format!("line {}: {}", n + 1, message),
        })?;
        let map = map.get_or_insert_with(|| VectorMap::new(vector.len()));
        map.insert(id, &vector)
            .map_err(|e| EmbedError::FormatMismatch {
                path: path.display().to_string(),
                message: format!("line {}: {}", n + 1, e),
            })?;
    }

    Ok(map.unwrap_or_else(|| VectorMap::new(0)))
}

/// Re-read `path` and check the first entry has `expected_dimension`
/// components. Never modifies the file.
pub fn verify(path: impl AsRef<Path>, expected_dimension: usize) -> Result<FileSummary> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut line_count = 0;
    let mut first: Option<String> = None;
    for line in reader.lines() {
        let line = line?;
        if first.is_none() {
            first = Some(line);
        }
        line_count += 1;
    }

    let Some(first) = first else {
        return Ok(FileSummary {
            line_count: 0,
            first_entry_dimension: None,
        });
    };

    let mismatch = |message: String| {
        error!(path = %path.display(), %message, "embedding file failed verification");
        EmbedError::FormatMismatch {
            path: path.display().to_string(),
            message,
        }
    };

    let parts: Vec<&str> = first.trim().split(':').collect();
    if parts.len() != 2 {
        return Err(mismatch(format!(
            "first line has {} ':'-separated parts, expected 2",
            parts.len()
        )));
    }
    let dimension = parts[1].split_whitespace().count();
    if dimension != expected_dimension {
        return Err(mismatch(format!(
            "first entry has {} components, expected {}",
            dimension, expected_dimension
        )));
    }

    Ok(FileSummary {
        line_count,
        first_entry_dimension: Some(dimension),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn sample() -> VectorMap {
        let mut map = VectorMap::new(4);
        map.insert("31", &[0.25, -1.5, 3.0, 1e-7]).unwrap();
        map.insert("1029", &[0.1, 0.2, 0.3, -0.0]).unwrap();
        map
    }

    #[test]
    fn test_format_line() {
        assert_eq!(format_line("7", &[1.0, -0.5, 0.125]), "7:1 -0.5 0.125");
        assert_eq!(format_line("x", &[]), "x:");
    }

    #[test]
    fn test_write_exact_bytes() {
        let dir = TempDir::new("text_write").expect("Failed to create temp dir");
        let path = dir.path().join("emb.csv");
        let mut map = VectorMap::new(2);
        map.insert("1", &[1.0, 2.5]).unwrap();
        map.insert("2", &[-3.0, 0.0]).unwrap();

        write(&map, &path).unwrap();
        let bytes = std::fs::read_to_string(&path).unwrap();
        assert_eq!(bytes, "1:1 2.5\n2:-3 0");
    }

    #[test]
    fn test_roundtrip_two_entries_dimension_four() {
        let dir = TempDir::new("text_roundtrip").unwrap();
        let path = dir.path().join("item2vecEmb.csv");
        let map = sample();

        write(&map, &path).unwrap();
        let restored = read(&path).unwrap();
        assert_eq!(restored.ids().collect::<Vec<_>>(), vec!["31", "1029"]);
        for (id, v) in map.iter() {
            let r = restored.get(id).unwrap();
            for (a, b) in v.iter().zip(r) {
                assert!((a - b).abs() <= f32::EPSILON * a.abs().max(1.0));
            }
        }

        let summary = verify(&path, 4).unwrap();
        assert_eq!(summary.line_count, 2);
        assert_eq!(summary.first_entry_dimension, Some(4));
    }

    #[test]
    fn test_verify_mismatch_keeps_file() {
        let dir = TempDir::new("text_verify").unwrap();
        let path = dir.path().join("userEmb.csv");
        write(&sample(), &path).unwrap();
        let before = std::fs::read(&path).unwrap();

        let err = verify(&path, 5).unwrap_err();
        assert!(err.is_format_mismatch());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_verify_rejects_extra_colon() {
        let dir = TempDir::new("text_colon").unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "user:1:0.5 0.5").unwrap();
        assert!(verify(&path, 2).unwrap_err().is_format_mismatch());
    }

    #[test]
    fn test_empty_map_writes_empty_file() {
        let dir = TempDir::new("text_empty").unwrap();
        let path = dir.path().join("nested").join("empty.csv");
        write(&VectorMap::new(3), &path).unwrap();

        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
        let summary = verify(&path, 3).unwrap();
        assert_eq!(summary.line_count, 0);
        assert_eq!(summary.first_entry_dimension, None);
        assert!(read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_ragged_rows() {
        let dir = TempDir::new("text_ragged").unwrap();
        let path = dir.path().join("ragged.csv");
        std::fs::write(&path, "1:0.1 0.2\n2:0.3").unwrap();
        assert!(matches!(
            read(&path),
            Err(EmbedError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("5:1 2").unwrap(), ("5", vec![1.0, 2.0]));
        assert!(parse_line("5 1 2").is_err());
        assert!(parse_line(":1").is_err());
        assert!(parse_line("5:1 x").is_err());
    }
}
