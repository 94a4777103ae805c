//! Tag-prefixed line protocol between a unit of work and its supervisor.
//!
//! One tag, one JSON body, one line. A line starting with a recognized
//! tag is parsed into a typed payload; every other non-empty line is a
//! plain log line. The rule is uniform across phase families even though
//! each family stamps its own tag names. The transport underneath is
//! replaceable (pipes, an in-process channel) without changing this
//! format.

use crate::engine::types::ProgressSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tags for the initial-coding family.
pub const P2_PROGRESS_TAG: &str = "PROGRESS_UPDATE:";
pub const P2_STAGE_TAG: &str = "PHASE_UPDATE:";

/// Tags for the candidate-theme family.
pub const P3_PROGRESS_TAG: &str = "P3_PROGRESS_UPDATE:";
pub const P3_STAGE_TAG: &str = "P3_PHASE_UPDATE:";

/// Tag for the consolidation family (stage changes only; the merge is a
/// single call, not a per-case loop).
pub const P3B_STAGE_TAG: &str = "P3B_PHASE_UPDATE:";

/// Tags for the assignment family.
pub const P4_PROGRESS_TAG: &str = "P4_PROGRESS_UPDATE:";
pub const P4_STAGE_TAG: &str = "P4_PHASE_UPDATE:";

/// Tag for bulk-regeneration runs.
pub const BULK_PROGRESS_TAG: &str = "BULK_PROGRESS_UPDATE:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Progress,
    Stage,
    Bulk,
}

const TAGS: &[(&str, TagKind)] = &[
    (P2_PROGRESS_TAG, TagKind::Progress),
    (P3_PROGRESS_TAG, TagKind::Progress),
    (P4_PROGRESS_TAG, TagKind::Progress),
    (P2_STAGE_TAG, TagKind::Stage),
    (P3_STAGE_TAG, TagKind::Stage),
    (P3B_STAGE_TAG, TagKind::Stage),
    (P4_STAGE_TAG, TagKind::Stage),
    (BULK_PROGRESS_TAG, TagKind::Bulk),
];

/// Body of a progress-update line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub case_id: String,
    #[serde(default)]
    pub values: Vec<String>,
    pub progress: ProgressSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Body of a phase-change line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePayload {
    pub stage: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Body of a bulk-progress line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkProgressPayload {
    pub current: usize,
    pub total: usize,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
}

/// Result of classifying one line of unit-of-work output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Progress(ProgressPayload),
    Stage(StagePayload),
    Bulk(BulkProgressPayload),
    /// No recognized tag: forwarded as a plain log line.
    Log(String),
    /// A recognized tag followed by a payload that failed to decode. The
    /// supervisor logs and drops these; they must never crash it.
    Malformed { tag: &'static str, error: String },
}

pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim_end();
    for (tag, kind) in TAGS.iter().copied() {
        if let Some(body) = trimmed.strip_prefix(tag) {
            return match kind {
                TagKind::Progress => match serde_json::from_str(body) {
                    Ok(payload) => ParsedLine::Progress(payload),
                    Err(err) => ParsedLine::Malformed {
                        tag,
                        error: err.to_string(),
                    },
                },
                TagKind::Stage => match serde_json::from_str(body) {
                    Ok(payload) => ParsedLine::Stage(payload),
                    Err(err) => ParsedLine::Malformed {
                        tag,
                        error: err.to_string(),
                    },
                },
                TagKind::Bulk => match serde_json::from_str(body) {
                    Ok(payload) => ParsedLine::Bulk(payload),
                    Err(err) => ParsedLine::Malformed {
                        tag,
                        error: err.to_string(),
                    },
                },
            };
        }
    }
    ParsedLine::Log(trimmed.to_string())
}

/// Renders a tagged line; the inverse of [`parse_line`] for one payload.
pub fn render_line<T: Serialize>(tag: &str, payload: &T) -> String {
    let body = serde_json::to_string(payload).expect("protocol payload serializes to JSON");
    format!("{tag}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_payload() -> ProgressPayload {
        ProgressPayload {
            case_id: "case-1".to_string(),
            values: vec!["bicycle_theft_outdoor".to_string()],
            progress: ProgressSnapshot::new(1, 10, 1),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn progress_lines_round_trip() {
        let payload = progress_payload();
        let line = render_line(P2_PROGRESS_TAG, &payload);
        assert_eq!(parse_line(&line), ParsedLine::Progress(payload));
    }

    #[test]
    fn each_family_uses_its_own_tag() {
        let payload = progress_payload();
        let line = render_line(P3_PROGRESS_TAG, &payload);
        assert!(line.starts_with("P3_PROGRESS_UPDATE:"));
        assert!(matches!(parse_line(&line), ParsedLine::Progress(_)));
    }

    #[test]
    fn stage_lines_parse() {
        let payload = StagePayload {
            stage: "Initializing".to_string(),
            details: serde_json::json!({ "total_cases": 100 }),
            timestamp: Utc::now(),
        };
        let line = render_line(P3B_STAGE_TAG, &payload);
        assert_eq!(parse_line(&line), ParsedLine::Stage(payload));
    }

    #[test]
    fn bulk_lines_parse() {
        let payload = BulkProgressPayload {
            current: 3,
            total: 20,
            status: "Regenerating codes".to_string(),
            case_id: None,
        };
        let line = render_line(BULK_PROGRESS_TAG, &payload);
        assert_eq!(parse_line(&line), ParsedLine::Bulk(payload));
    }

    #[test]
    fn untagged_lines_are_log_lines() {
        assert_eq!(
            parse_line("Using data file: cases.json"),
            ParsedLine::Log("Using data file: cases.json".to_string())
        );
    }

    #[test]
    fn malformed_payload_is_reported_not_panicked() {
        let parsed = parse_line("PROGRESS_UPDATE:{not json at all");
        assert!(matches!(
            parsed,
            ParsedLine::Malformed {
                tag: P2_PROGRESS_TAG,
                ..
            }
        ));
    }

    #[test]
    fn tag_must_be_a_prefix() {
        // A tag in the middle of a line does not count.
        let parsed = parse_line("note: PROGRESS_UPDATE:{}");
        assert!(matches!(parsed, ParsedLine::Log(_)));
    }
}
