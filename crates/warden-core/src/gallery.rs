//! Known-identity gallery, loaded once at startup and read-only afterwards.

use crate::types::Encoding;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed gallery: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gallery has {encodings} encodings but {names} names")]
    CountMismatch { encodings: usize, names: usize },
    #[error("encoding {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("encoding {index} contains a non-finite value")]
    NonFinite { index: usize },
}

/// On-disk layout: the two parallel sequences produced by the gallery builder.
#[derive(Deserialize)]
struct GalleryFile {
    encodings: Vec<Encoding>,
    names: Vec<String>,
}

/// Ordered (encoding, name) table. Names are display labels and may repeat.
#[derive(Debug, Clone)]
pub struct Gallery {
    encodings: Vec<Encoding>,
    names: Vec<String>,
}

impl Gallery {
    /// Build a gallery from parallel sequences, validating counts and dimensions.
    pub fn new(encodings: Vec<Encoding>, names: Vec<String>) -> Result<Self, GalleryError> {
        if encodings.len() != names.len() {
            return Err(GalleryError::CountMismatch {
                encodings: encodings.len(),
                names: names.len(),
            });
        }

        if let Some(first) = encodings.first() {
            let expected = first.len();
            for (index, enc) in encodings.iter().enumerate() {
                if enc.len() != expected {
                    return Err(GalleryError::DimensionMismatch {
                        index,
                        expected,
                        actual: enc.len(),
                    });
                }
                if enc.values.iter().any(|v| !v.is_finite()) {
                    return Err(GalleryError::NonFinite { index });
                }
            }
        }

        Ok(Self { encodings, names })
    }

    /// Load a gallery file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GalleryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let gallery = Self::from_json(&raw)?;

        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            dimension = ?gallery.dimension(),
            "loaded gallery"
        );

        Ok(gallery)
    }

    pub fn from_json(raw: &str) -> Result<Self, GalleryError> {
        let file: GalleryFile = serde_json::from_str(raw)?;
        Self::new(file.encodings, file.names)
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    /// Encoding dimension shared by every entry, or `None` for an empty gallery.
    pub fn dimension(&self) -> Option<usize> {
        self.encodings.first().map(Encoding::len)
    }

    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Distinct names in first-appearance order.
    pub fn identities(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for name in &self.names {
            if !seen.contains(&name.as_str()) {
                seen.push(name.as_str());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_json_parallel_sequences() {
        let gallery = Gallery::from_json(
            r#"{"encodings": [[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]],
                "names": ["alice", "bob", "alice"]}"#,
        )
        .unwrap();

        assert_eq!(gallery.len(), 3);
        assert_eq!(gallery.dimension(), Some(2));
        assert_eq!(gallery.name(1), Some("bob"));
        assert_eq!(gallery.name(3), None);
        assert_eq!(gallery.identities(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let err = Gallery::from_json(r#"{"encodings": [[0.1], [0.2]], "names": ["alice"]}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            GalleryError::CountMismatch { encodings: 2, names: 1 }
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = Gallery::new(
            vec![Encoding::new(vec![0.1, 0.2]), Encoding::new(vec![0.3])],
            vec!["a".into(), "b".into()],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch { index: 1, expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = Gallery::new(
            vec![Encoding::new(vec![0.1, f32::NAN])],
            vec!["a".into()],
        )
        .unwrap_err();
        assert!(matches!(err, GalleryError::NonFinite { index: 0 }));
    }

    #[test]
    fn test_empty_gallery_loads() {
        let gallery = Gallery::from_json(r#"{"encodings": [], "names": []}"#).unwrap();
        assert!(gallery.is_empty());
        assert_eq!(gallery.dimension(), None);
    }

    #[test]
    fn test_corrupt_json_is_parse_error() {
        let err = Gallery::from_json("{\"encodings\": [[0.1]").unwrap_err();
        assert!(matches!(err, GalleryError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Gallery::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, GalleryError::Io { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"encodings": [[1.0, 0.0, 0.0]], "names": ["carol"]}}"#).unwrap();

        let gallery = Gallery::load(file.path()).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.name(0), Some("carol"));
    }
}
