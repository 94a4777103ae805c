//! themata - phased thematic-analysis orchestration engine
//!
//! This library runs a multi-stage qualitative-coding pipeline over a
//! corpus of case records: Phase 2 assigns short behavioral codes to each
//! case, Phase 3 groups codes into candidate themes, Phase 3b consolidates
//! candidates into a mutually-exclusive final theme set, and Phase 4
//! assigns the final themes back onto every case.
//!
//! # Core Concepts
//!
//! - **Provider adapters**: capability-equivalent backends (Gemini,
//!   OpenAI, Claude) behind one trait, each with its own rate-limit
//!   backoff, selected through a unified client
//! - **Consistency registry**: the running memory of labels produced so
//!   far in a run, fed back into every later prompt so a corpus is coded
//!   coherently
//! - **Job supervision**: one running job per phase name, a tag-prefixed
//!   line protocol between the unit of work and its supervisor, and a
//!   broadcast hub fanning typed events out to observers
//!
//! # Example
//!
//! ```ignore
//! use themata::{BroadcastHub, JobSupervisor, Phase, PhaseParams};
//! use themata::job::AnalysisUnit;
//! use themata::provider::{Credentials, UnifiedClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = UnifiedClient::from_credentials(
//!     &Credentials::from_env(),
//!     &Default::default(),
//! )?;
//! let hub = BroadcastHub::new();
//! let (_id, mut events) = hub.subscribe();
//!
//! let supervisor = JobSupervisor::new(hub, Arc::new(AnalysisUnit::new(Arc::new(client))));
//! supervisor.start(Phase::P2, PhaseParams {
//!     data_file: "data/cases.json".into(),
//!     ..Default::default()
//! })?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod hub;
pub mod job;
pub mod provider;
pub mod util;

pub use config::{ConfigError, EngineConfig};
pub use corpus::{CorpusStore, JsonCorpus, StoreError};
pub use engine::{
    AnalysisOutcome, AnalysisResult, CancelFlag, CaseRecord, CodingTask, ConsistencyRegistry,
    PhaseAnalyzer, ProgressSnapshot,
};
pub use hub::{BroadcastHub, LogLevel, PhaseEvent};
pub use job::{
    JobState, JobStatus, JobSupervisor, Phase, PhaseParams, StopAck, SupervisorError, UnitOfWork,
};
pub use provider::{
    AnalyzeOptions, ClientError, Credentials, ProviderError, ProviderKind, ProviderResponse,
    UnifiedClient,
};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn name_is_themata() {
        assert_eq!(NAME, "themata");
    }
}
