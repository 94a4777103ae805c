//! Progress sink for analysis runs.

use super::types::ProgressSnapshot;

/// Events emitted by the engine as a run advances.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A case was analyzed, written back, and appended to the registry.
    /// The snapshot reflects the state after this case.
    CaseCompleted {
        case_id: String,
        values: Vec<String>,
        snapshot: ProgressSnapshot,
    },

    /// A case failed; the registry and snapshot are unchanged.
    CaseFailed { case_id: String, reason: String },

    /// The run moved to a new stage (initializing, processing, complete).
    StageChanged {
        stage: String,
        details: serde_json::Value,
    },
}

/// Receives engine events; implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Sink that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl ProgressSink for NoOpSink {
    fn on_event(&self, _event: &EngineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    impl ProgressSink for CountingSink {
        fn on_event(&self, _event: &EngineEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_sink_accepts_events() {
        NoOpSink.on_event(&EngineEvent::CaseFailed {
            case_id: "1".to_string(),
            reason: "test".to_string(),
        });
    }

    #[test]
    fn sinks_observe_every_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink {
            count: count.clone(),
        };
        sink.on_event(&EngineEvent::StageChanged {
            stage: "Initializing".to_string(),
            details: serde_json::json!({}),
        });
        sink.on_event(&EngineEvent::CaseCompleted {
            case_id: "1".to_string(),
            values: vec!["x".to_string()],
            snapshot: ProgressSnapshot::new(1, 2, 1),
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
