//! Catalog documents, the units derived from them, and the CSV dataset
//! they are read from.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use knot_embeddings::Provenance;

use crate::config::DatasetConfig;
use crate::error::{Result, RetrievalError};
use crate::segmenter::SentenceSegmenter;

/// A catalog item: an opaque identifier and its free-text description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Catalog identifier, such as `m/the_matrix`.
    pub id: String,
    /// Description text; empty when the catalog had none.
    pub text: String,
}

impl Document {
    /// Create a document. A missing description becomes the empty string.
    pub fn new(id: impl Into<String>, text: Option<impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            text: text.map(Into::into).unwrap_or_default(),
        }
    }

    /// Derive the units to embed for this document.
    ///
    /// Sentence units are numbered from 1 and identified as
    /// `{document_id}_{ordinal}`. A document-granularity unit carries the
    /// document id itself. Blank descriptions yield no units.
    pub fn units(&self, segmenter: &SentenceSegmenter, granularity: Granularity) -> Vec<SentenceUnit> {
        match granularity {
            Granularity::Sentence => segmenter
                .segment(&self.text)
                .into_iter()
                .enumerate()
                .map(|(index, text)| SentenceUnit {
                    id: format!("{}_{}", self.id, index + 1),
                    document_id: self.id.clone(),
                    ordinal: index + 1,
                    text,
                })
                .collect(),
            Granularity::Document => {
                let text = self.text.trim();
                if text.is_empty() {
                    return Vec::new();
                }
                vec![SentenceUnit {
                    id: self.id.clone(),
                    document_id: self.id.clone(),
                    ordinal: 1,
                    text: text.to_string(),
                }]
            }
        }
    }
}

/// What one embedded unit covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One unit per sentence.
    #[default]
    Sentence,
    /// One unit per whole description.
    Document,
}

impl std::str::FromStr for Granularity {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sentence" => Ok(Self::Sentence),
            "document" => Ok(Self::Document),
            other => Err(RetrievalError::Config(format!(
                "unknown granularity: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sentence => write!(f, "sentence"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// A piece of a document that gets its own embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    /// `{document_id}_{ordinal}`, or the document id at document granularity.
    pub id: String,
    /// Identifier of the owning document.
    pub document_id: String,
    /// 1-based position within the document.
    pub ordinal: usize,
    /// Sentence text, trimmed of surrounding whitespace.
    pub text: String,
}

impl SentenceUnit {
    /// Provenance recorded next to this unit's vector.
    pub fn provenance(&self) -> Provenance {
        Provenance {
            document_id: self.document_id.clone(),
            ordinal: self.ordinal,
            text: self.text.clone(),
        }
    }
}

/// The tabular catalog: every row of the input CSV, keyed by identifier.
#[derive(Debug, Clone)]
pub struct Dataset {
    id_column: String,
    text_column: String,
    rows: Vec<IndexMap<String, String>>,
    positions: HashMap<String, usize>,
}

impl Dataset {
    /// Read a dataset file.
    pub fn from_path(path: impl AsRef<Path>, config: &DatasetConfig) -> Result<Self> {
        let path = path.as_ref();
        let dataset = Self::from_reader(File::open(path)?, config)?;
        info!("Read {} rows from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    /// Read a dataset from CSV with a header row.
    ///
    /// Cells are decoded as UTF-8, replacing invalid bytes with U+FFFD.
    /// Short rows are padded with empty cells.
    pub fn from_reader<R: Read>(reader: R, config: &DatasetConfig) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers: Vec<String> = csv_reader
            .byte_headers()?
            .iter()
            .map(|field| decode(field, 1).into_owned())
            .collect();
        for column in [&config.id_column, &config.text_column] {
            if !headers.iter().any(|header| header == column) {
                return Err(RetrievalError::Dataset(format!(
                    "missing column `{column}`"
                )));
            }
        }

        let mut rows = Vec::new();
        let mut positions = HashMap::new();

        for (index, record) in csv_reader.byte_records().enumerate() {
            let record = record?;
            let line = record
                .position()
                .map(|position| position.line())
                .unwrap_or(index as u64 + 2);

            let mut row: IndexMap<String, String> = headers
                .iter()
                .map(|header| (header.clone(), String::new()))
                .collect();
            for (header, field) in headers.iter().zip(record.iter()) {
                row.insert(header.clone(), decode(field, line).into_owned());
            }

            let id = row
                .get(&config.id_column)
                .map(|id| id.trim().to_string())
                .unwrap_or_default();
            if id.is_empty() {
                return Err(RetrievalError::Dataset(format!(
                    "row on line {line} has an empty `{}`",
                    config.id_column
                )));
            }

            positions.entry(id).or_insert(rows.len());
            rows.push(row);
        }

        debug!("Parsed {} dataset rows", rows.len());
        Ok(Self {
            id_column: config.id_column.clone(),
            text_column: config.text_column.clone(),
            rows,
            positions,
        })
    }

    /// Documents in file order.
    pub fn documents(&self) -> Vec<Document> {
        self.rows
            .iter()
            .map(|row| {
                Document::new(
                    row.get(&self.id_column).map(|id| id.trim()).unwrap_or_default(),
                    row.get(&self.text_column).map(String::as_str),
                )
            })
            .collect()
    }

    /// The original row for a document, with columns in file order.
    ///
    /// When an identifier repeats, the first row wins.
    pub fn row(&self, id: &str) -> Option<&IndexMap<String, String>> {
        self.positions.get(id).map(|&position| &self.rows[position])
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn decode(field: &[u8], line: u64) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(field);
    if let Cow::Owned(_) = text {
        warn!("Replaced invalid UTF-8 on dataset line {line}");
    }
    text
}
