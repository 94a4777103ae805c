//! Typed event stream fanned out to observers.

use crate::engine::types::ProgressSnapshot;
use crate::job::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Discriminated events observers receive, serialized with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhaseEvent {
    Started {
        phase: Phase,
    },

    Progress {
        phase: Phase,
        case_id: String,
        #[serde(default)]
        values: Vec<String>,
        snapshot: ProgressSnapshot,
        timestamp: DateTime<Utc>,
    },

    PhaseChange {
        phase: Phase,
        stage: String,
        #[serde(default)]
        details: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    BulkProgress {
        phase: Phase,
        current: usize,
        total: usize,
        status: String,
    },

    Log {
        phase: Phase,
        text: String,
        level: LogLevel,
    },

    /// A phase completed and its successor is about to start.
    Chained {
        from: Phase,
        to: Phase,
    },

    Completed {
        phase: Phase,
    },

    Failed {
        phase: Phase,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },

    Stopped {
        phase: Phase,
    },
}

impl PhaseEvent {
    /// The phase this event concerns (the origin phase for `Chained`).
    pub fn phase(&self) -> Phase {
        match self {
            PhaseEvent::Started { phase }
            | PhaseEvent::Progress { phase, .. }
            | PhaseEvent::PhaseChange { phase, .. }
            | PhaseEvent::BulkProgress { phase, .. }
            | PhaseEvent::Log { phase, .. }
            | PhaseEvent::Completed { phase }
            | PhaseEvent::Failed { phase, .. }
            | PhaseEvent::Stopped { phase } => *phase,
            PhaseEvent::Chained { from, .. } => *from,
        }
    }

    /// True for the events that end a job's run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseEvent::Completed { .. } | PhaseEvent::Failed { .. } | PhaseEvent::Stopped { .. }
        )
    }
}
