//! Corpus storage collaborator.
//!
//! The engine reads an ordered sequence of case records and writes back
//! exactly one output field per case. The JSON-file store mirrors the
//! on-disk shape the analysis has always used: one object keyed by case
//! id, saved after every mutation so an interrupted run loses at most the
//! in-flight case.

use crate::engine::types::CaseRecord;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("case {0} not found in corpus")]
    CaseNotFound(String),

    #[error("unknown case field: {0}")]
    UnknownField(String),

    #[error("failed to access corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus {path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read/write access to the case corpus.
pub trait CorpusStore: Send + Sync {
    /// All cases in deterministic (id) order.
    fn list_cases(&self) -> Vec<CaseRecord>;

    fn read_case(&self, id: &str) -> Option<CaseRecord>;

    /// Writes one output field of one case and persists the change.
    fn write_case_field(&self, id: &str, field: &str, values: &[String])
        -> Result<(), StoreError>;
}

/// JSON-file-backed corpus store.
pub struct JsonCorpus {
    path: Option<PathBuf>,
    cases: Mutex<BTreeMap<String, CaseRecord>>,
}

impl JsonCorpus {
    /// Loads a corpus file of the shape `{ "<case id>": { ... }, ... }`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        let parsed: BTreeMap<String, CaseRecord> =
            serde_json::from_str(&raw).map_err(|source| StoreError::Malformed {
                path: path.clone(),
                source,
            })?;

        let cases = parsed
            .into_iter()
            .map(|(id, mut record)| {
                record.id = id.clone();
                (id, record)
            })
            .collect::<BTreeMap<_, _>>();

        debug!(path = %path.display(), cases = cases.len(), "corpus loaded");

        Ok(Self {
            path: Some(path),
            cases: Mutex::new(cases),
        })
    }

    /// An unpersisted corpus, for tests and ephemeral runs.
    pub fn in_memory(records: Vec<CaseRecord>) -> Self {
        let cases = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            path: None,
            cases: Mutex::new(cases),
        }
    }

    pub fn len(&self) -> usize {
        self.cases.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.lock().unwrap().is_empty()
    }

    fn save(&self, cases: &BTreeMap<String, CaseRecord>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(cases).map_err(|source| {
            StoreError::Malformed {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(path, serialized).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }
}

impl CorpusStore for JsonCorpus {
    fn list_cases(&self) -> Vec<CaseRecord> {
        self.cases.lock().unwrap().values().cloned().collect()
    }

    fn read_case(&self, id: &str) -> Option<CaseRecord> {
        self.cases.lock().unwrap().get(id).cloned()
    }

    fn write_case_field(
        &self,
        id: &str,
        field: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        let mut cases = self.cases.lock().unwrap();
        let record = cases
            .get_mut(id)
            .ok_or_else(|| StoreError::CaseNotFound(id.to_string()))?;

        match field {
            "codes" => record.codes = values.to_vec(),
            "candidate_theme" => record.candidate_theme = values.first().cloned(),
            "final_theme" => record.final_theme = values.first().cloned(),
            other => return Err(StoreError::UnknownField(other.to_string())),
        }

        self.save(&cases)
    }
}

/// Accepts both `"codes": "single"` and `"codes": ["a", "b"]`; older
/// corpus files carry the single-string form.
pub(crate) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Shape::deserialize(deserializer)? {
        Shape::One(value) => vec![value],
        Shape::Many(values) => values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn case(id: &str, text: &str) -> CaseRecord {
        CaseRecord {
            id: id.to_string(),
            text: text.to_string(),
            codes: Vec::new(),
            candidate_theme: None,
            final_theme: None,
        }
    }

    #[test]
    fn load_fills_ids_from_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.json");
        fs::write(
            &path,
            r#"{
                "case-2": { "text": "wallet taken on tram" },
                "case-1": { "text": "bicycle stolen from yard", "codes": "bicycle_theft" }
            }"#,
        )
        .unwrap();

        let corpus = JsonCorpus::load(&path).unwrap();
        let cases = corpus.list_cases();
        assert_eq!(cases.len(), 2);
        // BTreeMap ordering keeps listing deterministic.
        assert_eq!(cases[0].id, "case-1");
        assert_eq!(cases[0].codes, vec!["bicycle_theft"]);
        assert_eq!(cases[1].id, "case-2");
    }

    #[test]
    fn load_accepts_list_shaped_codes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.json");
        fs::write(
            &path,
            r#"{ "c1": { "text": "t", "codes": ["a", "b"] } }"#,
        )
        .unwrap();

        let corpus = JsonCorpus::load(&path).unwrap();
        assert_eq!(corpus.read_case("c1").unwrap().codes, vec!["a", "b"]);
    }

    #[test]
    fn load_reports_malformed_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonCorpus::load(&path),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn writes_persist_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.json");
        fs::write(&path, r#"{ "c1": { "text": "t" } }"#).unwrap();

        let corpus = JsonCorpus::load(&path).unwrap();
        corpus
            .write_case_field("c1", "codes", &["theft".to_string()])
            .unwrap();

        let reloaded = JsonCorpus::load(&path).unwrap();
        assert_eq!(reloaded.read_case("c1").unwrap().codes, vec!["theft"]);
    }

    #[test]
    fn write_rejects_unknown_fields_and_cases() {
        let corpus = JsonCorpus::in_memory(vec![case("c1", "t")]);
        assert!(matches!(
            corpus.write_case_field("c1", "verdict", &[]),
            Err(StoreError::UnknownField(_))
        ));
        assert!(matches!(
            corpus.write_case_field("missing", "codes", &[]),
            Err(StoreError::CaseNotFound(_))
        ));
    }

    #[test]
    fn single_value_fields_take_the_first_value() {
        let corpus = JsonCorpus::in_memory(vec![case("c1", "t")]);
        corpus
            .write_case_field("c1", "candidate_theme", &["theft".to_string(), "extra".to_string()])
            .unwrap();
        assert_eq!(
            corpus.read_case("c1").unwrap().candidate_theme,
            Some("theft".to_string())
        );
    }
}
