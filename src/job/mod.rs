//! Job lifecycle supervision for the pipeline phases.

pub mod chain;
pub mod protocol;
pub mod supervisor;
pub mod units;

pub use supervisor::{
    JobStatus, JobSupervisor, LineSink, PhaseParams, StopAck, SupervisorError, UnitOfWork,
};
pub use units::AnalysisUnit;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The named stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Initial coding: one behavioral code per case.
    P2,
    /// Candidate themes: group codes into provisional themes.
    P3,
    /// Consolidation: merge candidates into a final theme set.
    P3b,
    /// Assignment: apply final themes back onto every case.
    P4,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::P2 => "p2",
            Phase::P3 => "p3",
            Phase::P3b => "p3b",
            Phase::P4 => "p4",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "p2" => Some(Phase::P2),
            "p3" => Some(Phase::P3),
            "p3b" => Some(Phase::P3b),
            "p4" => Some(Phase::P4),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one phase's job slot.
///
/// `Running` is the only state retained in the slot; termination clears
/// the slot, so a queried idle phase reads as `Idle` whether or not it
/// has run before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_round_trip() {
        for phase in [Phase::P2, Phase::P3, Phase::P3b, Phase::P4] {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse("p5"), None);
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Phase::P3b).unwrap(), "p3b");
    }
}
