//! In-process units of work for the pipeline phases.
//!
//! Each unit drives the analysis engine (or the one-shot consolidation
//! call) and reports through the line protocol, which keeps the
//! supervisor agnostic about whether the work runs in-process or in a
//! supervised child process.

use super::protocol::{self, BulkProgressPayload, ProgressPayload, StagePayload};
use super::supervisor::{LineSink, PhaseParams, UnitOfWork};
use super::Phase;
use crate::corpus::{CorpusStore, JsonCorpus};
use crate::engine::{
    CancelFlag, CodingTask, EngineEvent, PhaseAnalyzer, ProgressSink, SYSTEM_PROMPT,
};
use crate::provider::{parse_mapping, normalize_values, AnalyzeOptions, UnifiedClient};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Tag names a phase family stamps on its lines.
struct TagSet {
    progress: Option<&'static str>,
    stage: &'static str,
}

fn tags_for(phase: Phase) -> TagSet {
    match phase {
        Phase::P2 => TagSet {
            progress: Some(protocol::P2_PROGRESS_TAG),
            stage: protocol::P2_STAGE_TAG,
        },
        Phase::P3 => TagSet {
            progress: Some(protocol::P3_PROGRESS_TAG),
            stage: protocol::P3_STAGE_TAG,
        },
        Phase::P3b => TagSet {
            progress: None,
            stage: protocol::P3B_STAGE_TAG,
        },
        Phase::P4 => TagSet {
            progress: Some(protocol::P4_PROGRESS_TAG),
            stage: protocol::P4_STAGE_TAG,
        },
    }
}

/// Adapts engine events onto the line protocol.
struct LineProgressSink {
    sink: LineSink,
    tags: TagSet,
}

impl ProgressSink for LineProgressSink {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::CaseCompleted {
                case_id,
                values,
                snapshot,
            } => {
                if let Some(tag) = self.tags.progress {
                    let payload = ProgressPayload {
                        case_id: case_id.clone(),
                        values: values.clone(),
                        progress: *snapshot,
                        timestamp: Utc::now(),
                    };
                    self.sink.send(protocol::render_line(tag, &payload));
                }
            }
            EngineEvent::CaseFailed { case_id, reason } => {
                self.sink.send(format!("case {case_id} failed: {reason}"));
            }
            EngineEvent::StageChanged { stage, details } => {
                let payload = StagePayload {
                    stage: stage.clone(),
                    details: details.clone(),
                    timestamp: Utc::now(),
                };
                self.sink.send(protocol::render_line(self.tags.stage, &payload));
            }
        }
    }
}

fn send_stage(sink: &LineSink, tag: &'static str, stage: &str, details: serde_json::Value) {
    let payload = StagePayload {
        stage: stage.to_string(),
        details,
        timestamp: Utc::now(),
    };
    sink.send(protocol::render_line(tag, &payload));
}

/// Sidecar file the consolidation step writes its theme mapping to.
pub fn theme_set_path(data_file: &Path) -> PathBuf {
    let stem = data_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("corpus");
    data_file.with_file_name(format!("{stem}_final_themes.json"))
}

/// Production unit of work: runs every phase in-process against the
/// unified client.
pub struct AnalysisUnit {
    client: Arc<UnifiedClient>,
}

impl AnalysisUnit {
    pub fn new(client: Arc<UnifiedClient>) -> Self {
        Self { client }
    }

    fn analyze_options(params: &PhaseParams) -> AnalyzeOptions {
        AnalyzeOptions {
            provider: params.provider.clone(),
            model: params.model.clone(),
        }
    }

    async fn run_coding_phase(
        &self,
        phase: Phase,
        task: CodingTask,
        params: PhaseParams,
        sink: LineSink,
        cancel: CancelFlag,
    ) -> anyhow::Result<()> {
        let tags = tags_for(phase);
        let store = Arc::new(
            JsonCorpus::load(&params.data_file)
                .with_context(|| format!("loading corpus {}", params.data_file.display()))?,
        );

        let all_cases = store.list_cases();
        let total = all_cases.len();

        // Cases that already carry this phase's output seed the registry
        // and are never re-sent to the provider.
        let mut seed = Vec::new();
        let mut pending = Vec::new();
        for case in all_cases {
            match task.output_of(&case) {
                Some(values) => seed.extend(values),
                None => pending.push(case),
            }
        }
        let processed = total - pending.len();

        let options = Self::analyze_options(&params);
        let system_tokens = self.client.count_tokens(SYSTEM_PROMPT, &options).await;
        info!(
            %phase,
            total,
            processed,
            remaining = pending.len(),
            system_tokens,
            "coding phase starting"
        );

        send_stage(
            &sink,
            tags.stage,
            "Initializing",
            json!({
                "data_file": params.data_file.display().to_string(),
                "total_cases": total,
                "processed_cases": processed,
                "remaining_cases": pending.len(),
            }),
        );

        let progress_sink = Arc::new(LineProgressSink {
            sink: sink.clone(),
            tags: tags_for(phase),
        });

        let mut analyzer = PhaseAnalyzer::new(self.client.clone(), store, task, SYSTEM_PROMPT)
            .with_instructions(params.instructions.clone())
            .with_options(options)
            .with_sink(progress_sink)
            .with_cancel(cancel)
            .with_progress_baseline(processed, total);
        analyzer.seed_registry(seed);

        send_stage(
            &sink,
            tags.stage,
            "Processing Cases",
            json!({ "remaining_cases": pending.len() }),
        );

        let results = analyzer.run(&pending).await;
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let failed = results.len() - succeeded;

        send_stage(
            &sink,
            tags.stage,
            "Complete",
            json!({
                "processed_this_run": succeeded,
                "failed_this_run": failed,
                "unique_labels": analyzer.registry().unique_count(),
            }),
        );
        info!(%phase, succeeded, failed, "coding phase finished");

        Ok(())
    }

    /// Phase 3b: one consolidation call over the candidate-theme
    /// inventory, producing the candidate -> final mapping.
    async fn run_merge(
        &self,
        params: PhaseParams,
        sink: LineSink,
        cancel: CancelFlag,
    ) -> anyhow::Result<()> {
        let tags = tags_for(Phase::P3b);
        let store = JsonCorpus::load(&params.data_file)
            .with_context(|| format!("loading corpus {}", params.data_file.display()))?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for case in store.list_cases() {
            if let Some(theme) = case.candidate_theme {
                *counts.entry(theme).or_default() += 1;
            }
        }

        if counts.is_empty() {
            send_stage(
                &sink,
                tags.stage,
                "Complete",
                json!({ "final_theme_count": 0, "note": "no candidate themes to consolidate" }),
            );
            return Ok(());
        }

        send_stage(
            &sink,
            tags.stage,
            "Consolidating",
            json!({ "candidate_theme_count": counts.len() }),
        );

        if cancel.is_set() {
            return Ok(());
        }

        let inventory = counts
            .iter()
            .map(|(theme, count)| format!("- {} ({count} data points)", theme.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n");

        let user_prompt = format!(
            "Finalize the themes of the analysis. You are given every candidate theme \
             generated so far, with the number of data points carrying it. Create a final, \
             refined and consistent set of themes: the final themes must be mutually \
             exclusive and must cover the whole spectrum of the analyzed data. Map every \
             candidate theme to exactly one final theme.\n\n\
             CANDIDATE THEMES\n{inventory}\n\n\
             Reply with a JSON object mapping each candidate theme to its final theme.\n"
        );

        let response = self
            .client
            .analyze(SYSTEM_PROMPT, &user_prompt, &Self::analyze_options(&params))
            .await
            .context("consolidation call failed")?;

        let mapping =
            parse_mapping(&response.content).context("consolidation reply had no parseable mapping")?;

        let themes: BTreeMap<String, String> = mapping
            .iter()
            .map(|(candidate, value)| {
                let final_theme = normalize_values(value)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| candidate.clone());
                (candidate.clone(), final_theme)
            })
            .collect();

        let out_path = theme_set_path(&params.data_file);
        let serialized = serde_json::to_string_pretty(&themes)?;
        fs::write(&out_path, serialized)
            .with_context(|| format!("writing theme set {}", out_path.display()))?;

        let final_count = themes.values().collect::<std::collections::BTreeSet<_>>().len();
        send_stage(
            &sink,
            tags.stage,
            "Complete",
            json!({
                "candidate_theme_count": counts.len(),
                "final_theme_count": final_count,
                "output_file": out_path.display().to_string(),
            }),
        );
        info!(final_count, "consolidation finished");

        Ok(())
    }

    /// Seeds the final-theme inventory for Phase 4 from the consolidation
    /// sidecar, when one exists next to the corpus.
    fn consolidated_themes(data_file: &Path) -> Vec<String> {
        let path = theme_set_path(data_file);
        let Ok(raw) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
            Ok(mapping) => {
                let themes: std::collections::BTreeSet<String> =
                    mapping.into_values().collect();
                themes.into_iter().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl UnitOfWork for AnalysisUnit {
    async fn run(
        &self,
        phase: Phase,
        params: PhaseParams,
        sink: LineSink,
        cancel: CancelFlag,
    ) -> anyhow::Result<()> {
        match phase {
            Phase::P2 => {
                self.run_coding_phase(phase, CodingTask::InitialCodes, params, sink, cancel)
                    .await
            }
            Phase::P3 => {
                self.run_coding_phase(phase, CodingTask::CandidateThemes, params, sink, cancel)
                    .await
            }
            Phase::P3b => self.run_merge(params, sink, cancel).await,
            Phase::P4 => {
                // The consolidated set becomes the starting inventory so
                // assignment only invents a theme when nothing fits.
                let consolidated = Self::consolidated_themes(&params.data_file);
                if consolidated.is_empty() {
                    self.run_coding_phase(
                        phase,
                        CodingTask::FinalThemeAssignment,
                        params,
                        sink,
                        cancel,
                    )
                    .await
                } else {
                    self.run_assignment(consolidated, params, sink, cancel).await
                }
            }
        }
    }
}

impl AnalysisUnit {
    async fn run_assignment(
        &self,
        consolidated: Vec<String>,
        params: PhaseParams,
        sink: LineSink,
        cancel: CancelFlag,
    ) -> anyhow::Result<()> {
        let phase = Phase::P4;
        let task = CodingTask::FinalThemeAssignment;
        let tags = tags_for(phase);
        let store = Arc::new(
            JsonCorpus::load(&params.data_file)
                .with_context(|| format!("loading corpus {}", params.data_file.display()))?,
        );

        let all_cases = store.list_cases();
        let total = all_cases.len();
        let mut seed = consolidated;
        let mut pending = Vec::new();
        for case in all_cases {
            match task.output_of(&case) {
                Some(values) => seed.extend(values),
                None => pending.push(case),
            }
        }
        let processed = total - pending.len();

        send_stage(
            &sink,
            tags.stage,
            "Initializing",
            json!({
                "data_file": params.data_file.display().to_string(),
                "total_cases": total,
                "consolidated_themes": seed.len(),
                "remaining_cases": pending.len(),
            }),
        );

        let progress_sink = Arc::new(LineProgressSink {
            sink: sink.clone(),
            tags: tags_for(phase),
        });
        let mut analyzer = PhaseAnalyzer::new(self.client.clone(), store, task, SYSTEM_PROMPT)
            .with_instructions(params.instructions.clone())
            .with_options(Self::analyze_options(&params))
            .with_sink(progress_sink)
            .with_cancel(cancel)
            .with_progress_baseline(processed, total);
        analyzer.seed_registry(seed);

        let results = analyzer.run(&pending).await;
        let succeeded = results.iter().filter(|r| r.is_success()).count();

        send_stage(
            &sink,
            tags.stage,
            "Complete",
            json!({
                "processed_this_run": succeeded,
                "failed_this_run": results.len() - succeeded,
                "unique_labels": analyzer.registry().unique_count(),
            }),
        );

        Ok(())
    }

    /// Re-runs initial coding over an explicit subset of case ids,
    /// reporting through the bulk tag family.
    pub async fn run_bulk_regeneration(
        &self,
        params: PhaseParams,
        case_ids: &[String],
        sink: LineSink,
        cancel: CancelFlag,
    ) -> anyhow::Result<()> {
        let task = CodingTask::InitialCodes;
        let store = Arc::new(
            JsonCorpus::load(&params.data_file)
                .with_context(|| format!("loading corpus {}", params.data_file.display()))?,
        );

        let total = case_ids.len();
        sink.send(protocol::render_line(
            protocol::BULK_PROGRESS_TAG,
            &BulkProgressPayload {
                current: 0,
                total,
                status: "Initializing bulk regeneration".to_string(),
                case_id: None,
            },
        ));

        // The whole corpus still seeds the registry; regeneration must
        // stay consistent with codes it is not touching.
        let seed: Vec<String> = store
            .list_cases()
            .iter()
            .filter_map(|case| task.output_of(case))
            .flatten()
            .collect();

        let mut analyzer =
            PhaseAnalyzer::new(self.client.clone(), store.clone(), task, SYSTEM_PROMPT)
                .with_options(Self::analyze_options(&params))
                .with_cancel(cancel.clone());
        analyzer.seed_registry(seed);

        for (index, case_id) in case_ids.iter().enumerate() {
            if cancel.is_set() {
                break;
            }
            let Some(case) = store.read_case(case_id) else {
                sink.send(format!("case {case_id} not found, skipping"));
                continue;
            };
            let results = analyzer.run(std::slice::from_ref(&case)).await;
            let status = match results.first() {
                Some(result) if result.is_success() => "Regenerated".to_string(),
                Some(_) => "Failed".to_string(),
                None => "Cancelled".to_string(),
            };
            sink.send(protocol::render_line(
                protocol::BULK_PROGRESS_TAG,
                &BulkProgressPayload {
                    current: index + 1,
                    total,
                    status,
                    case_id: Some(case_id.clone()),
                },
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_set_path_sits_next_to_the_corpus() {
        let path = theme_set_path(Path::new("/data/cases.json"));
        assert_eq!(path, Path::new("/data/cases_final_themes.json"));
    }

    #[test]
    fn tag_sets_differ_per_phase_family() {
        assert_eq!(tags_for(Phase::P2).progress, Some(protocol::P2_PROGRESS_TAG));
        assert_eq!(tags_for(Phase::P3).progress, Some(protocol::P3_PROGRESS_TAG));
        assert_eq!(tags_for(Phase::P3b).progress, None);
        assert_eq!(tags_for(Phase::P4).stage, protocol::P4_STAGE_TAG);
    }
}
