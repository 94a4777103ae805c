use super::commands::{RegenArgs, RunArgs};
use crate::config::EngineConfig;
use crate::engine::CancelFlag;
use crate::hub::{BroadcastHub, PhaseEvent};
use crate::job::{AnalysisUnit, JobSupervisor, LineSink, Phase, PhaseParams};
use crate::provider::{Credentials, UnifiedClient};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Starts one phase and streams its events until it (and anything it
/// chained into) terminates.
pub async fn handle_run(args: &RunArgs) -> i32 {
    let client = match build_client() {
        Ok(client) => client,
        Err(code) => return code,
    };

    let hub = BroadcastHub::new();
    let (subscriber, mut events) = hub.subscribe();
    let supervisor = JobSupervisor::new(hub.clone(), Arc::new(AnalysisUnit::new(client)));

    let phase = Phase::from(args.phase);
    let params = PhaseParams {
        data_file: args.data_file.clone(),
        provider: args.provider.clone(),
        model: args.model.clone(),
        instructions: args.instructions.clone(),
    };

    if let Err(err) = supervisor.start(phase, params) {
        eprintln!("Error: {err}");
        return 2;
    }

    let mut active: HashSet<Phase> = HashSet::from([phase]);
    let mut saw_failure = false;

    while let Some(event) = events.recv().await {
        render_event(&event);
        match &event {
            PhaseEvent::Chained { to, .. } => {
                active.insert(*to);
            }
            PhaseEvent::Failed { phase, .. } => {
                saw_failure = true;
                active.remove(phase);
            }
            PhaseEvent::Completed { phase } | PhaseEvent::Stopped { phase } => {
                active.remove(phase);
            }
            _ => {}
        }
        if active.is_empty() {
            break;
        }
    }

    hub.unsubscribe(subscriber);
    if saw_failure {
        1
    } else {
        0
    }
}

/// Re-runs initial coding for an explicit set of case ids.
pub async fn handle_regen(args: &RegenArgs) -> i32 {
    let client = match build_client() {
        Ok(client) => client,
        Err(code) => return code,
    };

    let params = PhaseParams {
        data_file: args.data_file.clone(),
        provider: args.provider.clone(),
        model: args.model.clone(),
        instructions: None,
    };

    let (sink, mut lines) = LineSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            println!("{line}");
        }
    });

    let unit = AnalysisUnit::new(client);
    let result = unit
        .run_bulk_regeneration(params, &args.case_ids, sink, CancelFlag::new())
        .await;
    let _ = printer.await;

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    }
}

/// Reports which providers have credentials and which one is the default.
pub async fn handle_providers() -> i32 {
    let credentials = Credentials::from_env();
    let config = EngineConfig::default();

    for (name, configured) in [
        ("gemini", credentials.gemini_api_key.is_some()),
        ("openai", credentials.openai_api_key.is_some()),
        ("claude", credentials.anthropic_api_key.is_some()),
    ] {
        let marker = if configured { "configured" } else { "not configured" };
        println!("{name:8} {marker}");
    }

    match UnifiedClient::from_credentials(&credentials, &config.client_options()) {
        Ok(client) => {
            println!("default  {}", client.default_provider());
            0
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

fn build_client() -> Result<Arc<UnifiedClient>, i32> {
    let config = EngineConfig::default();
    if let Err(err) = config.validate() {
        eprintln!("Configuration error: {err}");
        return Err(2);
    }
    debug!(%config, "configuration loaded");

    let credentials = Credentials::from_env();
    match UnifiedClient::from_credentials(&credentials, &config.client_options()) {
        Ok(client) => Ok(Arc::new(client)),
        Err(err) => {
            eprintln!("Error: {err}");
            Err(2)
        }
    }
}

fn render_event(event: &PhaseEvent) {
    match event {
        PhaseEvent::Started { phase } => println!("[{phase}] started"),
        PhaseEvent::Progress {
            phase,
            case_id,
            values,
            snapshot,
            ..
        } => {
            println!(
                "[{phase}] {}/{} ({:.1}%) case {case_id} -> {} ({} unique labels)",
                snapshot.processed,
                snapshot.total,
                snapshot.percentage,
                values.join(", "),
                snapshot.unique_count,
            );
        }
        PhaseEvent::PhaseChange { phase, stage, .. } => println!("[{phase}] stage: {stage}"),
        PhaseEvent::BulkProgress {
            phase,
            current,
            total,
            status,
        } => println!("[{phase}] bulk {current}/{total}: {status}"),
        PhaseEvent::Log { phase, text, .. } => println!("[{phase}] {text}"),
        PhaseEvent::Chained { from, to } => {
            println!("[{from}] completed, starting next phase {to}")
        }
        PhaseEvent::Completed { phase } => println!("[{phase}] completed"),
        PhaseEvent::Failed { phase, error, .. } => println!("[{phase}] FAILED: {error}"),
        PhaseEvent::Stopped { phase } => println!("[{phase}] stopped"),
    }
}
