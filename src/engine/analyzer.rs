//! Sequential case-by-case analysis loop.
//!
//! One provider call per case, strictly in input order: the prompt for a
//! case sees exactly the registry state left behind by the cases before
//! it. A failed case is recorded and skipped over, never letting one bad
//! reply abort the batch, and never touching the registry.

use super::progress::{EngineEvent, NoOpSink, ProgressSink};
use super::prompt::{CodingTask, PromptBuilder};
use super::registry::ConsistencyRegistry;
use super::types::{AnalysisResult, CaseRecord, FailureReason, ProgressSnapshot};
use crate::corpus::CorpusStore;
use crate::provider::{normalize_values, parse_mapping, AnalyzeOptions, UnifiedClient};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag, checked between cases.
///
/// The in-flight provider call is allowed to finish naturally; setting
/// the flag only prevents the next case from starting.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PhaseAnalyzer {
    client: Arc<UnifiedClient>,
    store: Arc<dyn CorpusStore>,
    task: CodingTask,
    system_prompt: String,
    prompt: PromptBuilder,
    options: AnalyzeOptions,
    registry: ConsistencyRegistry,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
    processed_baseline: usize,
    total: usize,
}

impl PhaseAnalyzer {
    pub fn new(
        client: Arc<UnifiedClient>,
        store: Arc<dyn CorpusStore>,
        task: CodingTask,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            task,
            system_prompt: system_prompt.into(),
            prompt: PromptBuilder::new(task),
            options: AnalyzeOptions::default(),
            registry: ConsistencyRegistry::new(),
            sink: Arc::new(NoOpSink),
            cancel: CancelFlag::new(),
            processed_baseline: 0,
            total: 0,
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.prompt = PromptBuilder::new(self.task).with_instructions(instructions);
        self
    }

    pub fn with_options(mut self, options: AnalyzeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Progress accounting for resumed runs: `processed` cases were done
    /// in earlier runs, out of `total` in the corpus.
    pub fn with_progress_baseline(mut self, processed: usize, total: usize) -> Self {
        self.processed_baseline = processed;
        self.total = total;
        self
    }

    /// Pre-loads the registry from prior results without any provider call.
    pub fn seed_registry<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.registry.seed(items);
    }

    pub fn registry(&self) -> &ConsistencyRegistry {
        &self.registry
    }

    /// Analyzes `cases` strictly in the given order.
    ///
    /// Returns one result per input case, in input order. When the cancel
    /// flag is set the remaining cases are left untouched and the results
    /// cover only the cases that ran.
    pub async fn run(&mut self, cases: &[CaseRecord]) -> Vec<AnalysisResult> {
        let total = if self.total > 0 {
            self.total
        } else {
            cases.len()
        };
        let mut processed = self.processed_baseline;
        let mut results = Vec::with_capacity(cases.len());

        for (index, case) in cases.iter().enumerate() {
            if self.cancel.is_set() {
                info!(
                    remaining = cases.len() - index,
                    "cancellation requested, leaving remaining cases untouched"
                );
                break;
            }
            results.push(self.analyze_case(case, &mut processed, total).await);
        }

        results
    }

    async fn analyze_case(
        &mut self,
        case: &CaseRecord,
        processed: &mut usize,
        total: usize,
    ) -> AnalysisResult {
        debug!(case_id = %case.id, "analyzing case");

        let payload = self.task.payload(case);
        let user_prompt = self.prompt.build(&self.registry, &case.id, &payload);

        let response = match self
            .client
            .analyze(&self.system_prompt, &user_prompt, &self.options)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return self.fail_case(case, FailureReason::Provider(err.to_string()));
            }
        };

        let Some(mapping) = parse_mapping(&response.content) else {
            return self.fail_case(case, FailureReason::Unparseable);
        };

        let Some(value) = mapping.get(&case.id) else {
            return self.fail_case(case, FailureReason::MissingKey);
        };

        let values = normalize_values(value);
        if let Err(err) = self
            .store
            .write_case_field(&case.id, self.task.output_field(), &values)
        {
            return self.fail_case(case, FailureReason::Storage(err.to_string()));
        }

        self.registry.append(&values);
        *processed += 1;

        let snapshot = ProgressSnapshot::new(*processed, total, self.registry.unique_count());
        info!(
            case_id = %case.id,
            processed = snapshot.processed,
            total = snapshot.total,
            "case processed and saved"
        );
        self.sink.on_event(&EngineEvent::CaseCompleted {
            case_id: case.id.clone(),
            values: values.clone(),
            snapshot,
        });

        AnalysisResult::success(case.id.clone(), values)
    }

    fn fail_case(&self, case: &CaseRecord, reason: FailureReason) -> AnalysisResult {
        warn!(case_id = %case.id, %reason, "case failed, continuing with next");
        self.sink.on_event(&EngineEvent::CaseFailed {
            case_id: case.id.clone(),
            reason: reason.to_string(),
        });
        AnalysisResult::failure(case.id.clone(), reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_starts_clear_and_latches() {
        let flag = CancelFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        // Clones observe the same flag.
        let clone = flag.clone();
        assert!(clone.is_set());
    }
}
