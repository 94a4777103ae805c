//! Incremental, consistency-preserving analysis engine.
//!
//! Drives one labeling pass (initial codes, candidate themes, or final
//! theme assignment) across an ordered corpus, one provider call per
//! case, feeding everything already produced back into later prompts.

pub mod analyzer;
pub mod progress;
pub mod prompt;
pub mod registry;
pub mod types;

pub use analyzer::{CancelFlag, PhaseAnalyzer};
pub use progress::{EngineEvent, NoOpSink, ProgressSink};
pub use prompt::{CodingTask, PromptBuilder, SYSTEM_PROMPT};
pub use registry::ConsistencyRegistry;
pub use types::{AnalysisOutcome, AnalysisResult, CaseRecord, FailureReason, ProgressSnapshot};
