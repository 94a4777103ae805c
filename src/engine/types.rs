//! Core data types for the analysis engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One record of the analyzed corpus.
///
/// The engine only ever writes the output field of the phase it is
/// running; everything else belongs to the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Unique within the corpus; carried as the object key on disk.
    #[serde(skip)]
    pub id: String,

    /// Source narrative of the case.
    #[serde(default)]
    pub text: String,

    /// Behavioral codes assigned in Phase 2.
    #[serde(
        default,
        deserialize_with = "crate::corpus::string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub codes: Vec<String>,

    /// Provisional grouping label from Phase 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_theme: Option<String>,

    /// Consolidated label applied in Phase 4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_theme: Option<String>,
}

/// Derived progress figures, recomputed after each case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
    /// Distinct entries in the consistency registry.
    pub unique_count: usize,
}

impl ProgressSnapshot {
    pub fn new(processed: usize, total: usize, unique_count: usize) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            processed as f64 / total as f64 * 100.0
        };
        Self {
            processed,
            total,
            percentage,
            unique_count,
        }
    }
}

/// Why a single case failed; the batch always continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The provider call failed (network, auth, block, exhausted retries).
    Provider(String),
    /// The reply carried no parseable JSON object.
    Unparseable,
    /// The reply parsed but did not contain the case's own id.
    MissingKey,
    /// The produced value could not be written back to the corpus.
    Storage(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Provider(message) => write!(f, "provider error: {message}"),
            FailureReason::Unparseable => write!(f, "reply had no parseable JSON object"),
            FailureReason::MissingKey => write!(f, "case id missing from parsed reply"),
            FailureReason::Storage(message) => write!(f, "storage error: {message}"),
        }
    }
}

/// Outcome of analyzing one case. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Success { values: Vec<String> },
    Failure { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub case_id: String,
    pub outcome: AnalysisOutcome,
}

impl AnalysisResult {
    pub fn success(case_id: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            case_id: case_id.into(),
            outcome: AnalysisOutcome::Success { values },
        }
    }

    pub fn failure(case_id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            case_id: case_id.into(),
            outcome: AnalysisOutcome::Failure { reason },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AnalysisOutcome::Success { .. })
    }
}
