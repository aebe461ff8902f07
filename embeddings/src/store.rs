//! Insert-only embedding store with CSV persistence.
//!
//! The store keeps entries in insertion order and indexes them by id. It is
//! filled once per dataset snapshot and then only read; re-ingestion builds a
//! new store instead of updating this one.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Where a stored vector came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Identifier of the source document.
    pub document_id: String,

    /// 1-based sentence position within the document.
    pub ordinal: usize,

    /// The text that was embedded.
    pub text: String,
}

/// An entry in the embedding store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Unique identifier.
    pub id: String,

    /// The embedding vector, as produced by the encoder.
    pub embedding: Embedding,

    /// Provenance, when known.
    pub provenance: Option<Provenance>,
}

/// Ordered collection of embeddings sharing one dimension.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    entries: Vec<StoreEntry>,
    positions: HashMap<String, usize>,
}

impl EmbeddingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
        }
    }

    /// Append an embedding.
    ///
    /// The first insert fixes the store's dimension; later vectors must
    /// match it. Identifiers are never overwritten.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        embedding: Embedding,
        provenance: Option<Provenance>,
    ) -> Result<()> {
        let id = id.into();

        if embedding.is_empty() {
            return Err(EmbeddingError::EmptyEmbedding { id });
        }

        if let Some(dimension) = self.dimension() {
            if embedding.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
        }

        if self.positions.contains_key(&id) {
            return Err(EmbeddingError::DuplicateIdentifier(id));
        }

        self.positions.insert(id.clone(), self.entries.len());
        debug!("Inserted embedding into store: {id}");
        self.entries.push(StoreEntry {
            id,
            embedding,
            provenance,
        });

        Ok(())
    }

    /// Get an embedding by ID.
    pub fn get(&self, id: &str) -> Result<&Embedding> {
        self.entry(id)
            .map(|entry| &entry.embedding)
            .ok_or_else(|| EmbeddingError::NotFound(id.to_string()))
    }

    /// Get the full entry for an ID.
    pub fn entry(&self, id: &str) -> Option<&StoreEntry> {
        self.positions.get(id).map(|&position| &self.entries[position])
    }

    /// Check if an ID exists in the store.
    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Get the number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimension shared by every vector, or `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|entry| entry.embedding.len())
    }

    /// All `(id, vector)` pairs in insertion order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &Embedding)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.id.as_str(), &entry.embedding))
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    /// Entries whose provenance names `document_id`, in insertion order.
    pub fn entries_for_document<'a>(
        &'a self,
        document_id: &'a str,
    ) -> impl Iterator<Item = &'a StoreEntry> + 'a {
        self.entries.iter().filter(move |entry| {
            entry
                .provenance
                .as_ref()
                .is_some_and(|p| p.document_id == document_id)
        })
    }

    /// Re-check that every vector has the same, non-zero dimension.
    pub fn validate(&self) -> Result<()> {
        let Some(dimension) = self.dimension() else {
            return Ok(());
        };
        for entry in &self.entries {
            if entry.embedding.is_empty() {
                return Err(EmbeddingError::EmptyEmbedding {
                    id: entry.id.clone(),
                });
            }
            if entry.embedding.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: entry.embedding.len(),
                });
            }
        }
        Ok(())
    }

    /// Write the store as CSV to `path`.
    ///
    /// The file is written next to the destination and renamed into place,
    /// so readers never observe a half-written store.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path_for(path);
        let file = fs::File::create(&temp_path)?;
        self.to_writer(file)?;
        fs::rename(&temp_path, path)?;

        info!("Persisted {} embeddings to {}", self.len(), path.display());
        Ok(())
    }

    /// Write the store as CSV.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            let provenance = entry.provenance.as_ref();
            writer.serialize(StoreRow {
                sentence_id: &entry.id,
                document_id: provenance.map(|p| p.document_id.as_str()),
                ordinal: provenance.map(|p| p.ordinal),
                sentence: provenance.map(|p| p.text.as_str()),
                embedding: serde_json::to_string(&entry.embedding)?,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a store from the CSV file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let store = Self::from_reader(file)?;
        info!("Loaded {} embeddings from {}", store.len(), path.display());
        Ok(store)
    }

    /// Read a store from CSV.
    ///
    /// Accepts both the full layout written by [`EmbeddingStore::to_writer`]
    /// and the bare `sentence_id,sentence,embedding` layout, in which case
    /// the document and ordinal are recovered from the `{document}_{n}` id.
    /// Rows of the full layout with empty provenance cells load without
    /// provenance.
    /// Rows go through [`EmbeddingStore::insert`], so duplicates and ragged
    /// dimensions are rejected.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let bare = !reader
            .headers()?
            .iter()
            .any(|header| header == "document_id");
        let mut store = Self::new();

        for (index, row) in reader.deserialize::<StoredRow>().enumerate() {
            let row = row?;
            // Line 1 is the header.
            let line = index as u64 + 2;

            let embedding: Embedding = serde_json::from_str(&row.embedding).map_err(|e| {
                EmbeddingError::InvalidRecord {
                    line,
                    reason: format!("embedding is not a list of numbers: {e}"),
                }
            })?;

            let provenance = row.provenance(bare);
            store.insert(row.sentence_id, embedding, provenance)?;
        }

        Ok(store)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Serialize)]
struct StoreRow<'a> {
    sentence_id: &'a str,
    document_id: Option<&'a str>,
    ordinal: Option<usize>,
    sentence: Option<&'a str>,
    embedding: String,
}

#[derive(Deserialize)]
struct StoredRow {
    sentence_id: String,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    ordinal: Option<usize>,
    #[serde(default)]
    sentence: Option<String>,
    embedding: String,
}

impl StoredRow {
    /// Provenance of the row; `bare` rows derive it from the id.
    fn provenance(&self, bare: bool) -> Option<Provenance> {
        let text = self.sentence.clone().unwrap_or_default();
        match (&self.document_id, self.ordinal) {
            (Some(document_id), Some(ordinal)) => Some(Provenance {
                document_id: document_id.clone(),
                ordinal,
                text,
            }),
            _ if !bare => None,
            _ => {
                let (document_id, ordinal) = self.sentence_id.rsplit_once('_')?;
                let ordinal = ordinal.parse().ok()?;
                Some(Provenance {
                    document_id: document_id.to_string(),
                    ordinal,
                    text,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provenance(document_id: &str, ordinal: usize, text: &str) -> Option<Provenance> {
        Some(Provenance {
            document_id: document_id.to_string(),
            ordinal,
            text: text.to_string(),
        })
    }

    #[test]
    fn test_store_insert_and_get() {
        let mut store = EmbeddingStore::new();
        store.insert("m1_1", vec![1.0, 0.0, 0.0], None).unwrap();

        assert!(store.contains("m1_1"));
        assert!(!store.contains("m1_2"));
        assert_eq!(store.get("m1_1").unwrap(), &vec![1.0, 0.0, 0.0]);
        assert_eq!(store.dimension(), Some(3));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = EmbeddingStore::new();
        assert!(matches!(
            store.get("nope"),
            Err(EmbeddingError::NotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut store = EmbeddingStore::new();
        store.insert("a", vec![1.0, 2.0], None).unwrap();
        let err = store.insert("a", vec![3.0, 4.0], None).unwrap_err();

        assert!(matches!(err, EmbeddingError::DuplicateIdentifier(id) if id == "a"));
        assert_eq!(store.get("a").unwrap(), &vec![1.0, 2.0]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut store = EmbeddingStore::new();
        store.insert("a", vec![1.0, 0.0, 0.0], None).unwrap();
        store.insert("b", vec![0.0, 1.0, 0.0], None).unwrap();

        let err = store
            .insert("c", vec![1.0, 2.0, 3.0, 4.0, 5.0], None)
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 5
            }
        ));
        assert_eq!(store.len(), 2);
        store.validate().unwrap();
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let mut store = EmbeddingStore::new();
        assert!(matches!(
            store.insert("a", Vec::new(), None),
            Err(EmbeddingError::EmptyEmbedding { .. })
        ));
    }

    #[test]
    fn test_all_preserves_insertion_order() {
        let mut store = EmbeddingStore::with_capacity(3);
        for id in ["zeta", "alpha", "mid"] {
            store.insert(id, vec![1.0], None).unwrap();
        }
        let ids: Vec<&str> = store.all().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_entries_for_document() {
        let mut store = EmbeddingStore::new();
        store
            .insert("m1_1", vec![1.0], provenance("m1", 1, "One."))
            .unwrap();
        store
            .insert("m2_1", vec![1.0], provenance("m2", 1, "Two."))
            .unwrap();
        store
            .insert("m1_2", vec![1.0], provenance("m1", 2, "Three."))
            .unwrap();

        let ids: Vec<&str> = store
            .entries_for_document("m1")
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1_1", "m1_2"]);
    }

    #[test]
    fn test_csv_round_trip() {
        let mut store = EmbeddingStore::new();
        store
            .insert(
                "m1_1",
                vec![0.1, -2.5e-7, 3.25],
                provenance("m1", 1, "A hero saves the city, again."),
            )
            .unwrap();
        store
            .insert("loose", vec![1.0 / 3.0, 0.0, -1.0], None)
            .unwrap();

        let mut buffer = Vec::new();
        store.to_writer(&mut buffer).unwrap();
        let loaded = EmbeddingStore::from_reader(buffer.as_slice()).unwrap();

        assert_eq!(loaded.entries(), store.entries());
    }

    #[test]
    fn test_persist_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/store.csv");

        let mut store = EmbeddingStore::new();
        store
            .insert("m1_1", vec![0.5, 0.5], provenance("m1", 1, "Hi."))
            .unwrap();
        store.persist(&path).unwrap();

        assert!(!dir.path().join("nested/store.csv.tmp").exists());
        let loaded = EmbeddingStore::load(&path).unwrap();
        assert_eq!(loaded.entries(), store.entries());
    }

    #[test]
    fn test_missing_provenance_survives_reload() {
        let mut store = EmbeddingStore::new();
        store.insert("x_1", vec![0.5, 0.5], None).unwrap();

        let mut buffer = Vec::new();
        store.to_writer(&mut buffer).unwrap();
        let loaded = EmbeddingStore::from_reader(buffer.as_slice()).unwrap();

        assert_eq!(loaded.entry("x_1").unwrap().provenance, None);
    }

    #[test]
    fn test_load_bare_sentence_layout() {
        let csv = "sentence_id,sentence,embedding\n\
                   m/the_matrix_1,Neo wakes up.,\"[0.1, 0.2]\"\n\
                   m/the_matrix_2,He learns kung fu.,\"[0.3, 0.4]\"\n";

        let store = EmbeddingStore::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(store.len(), 2);

        let entry = store.entry("m/the_matrix_2").unwrap();
        assert_eq!(
            entry.provenance,
            provenance("m/the_matrix", 2, "He learns kung fu.")
        );
    }

    #[test]
    fn test_load_rejects_ragged_dimensions() {
        let csv = "sentence_id,sentence,embedding\n\
                   a_1,x,\"[0.1, 0.2, 0.3]\"\n\
                   a_2,y,\"[0.1, 0.2]\"\n";
        assert!(matches!(
            EmbeddingStore::from_reader(csv.as_bytes()),
            Err(EmbeddingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_load_reports_bad_embedding_line() {
        let csv = "sentence_id,sentence,embedding\n\
                   a_1,x,\"[0.1, 0.2]\"\n\
                   a_2,y,not-a-vector\n";
        assert!(matches!(
            EmbeddingStore::from_reader(csv.as_bytes()),
            Err(EmbeddingError::InvalidRecord { line: 3, .. })
        ));
    }
}
