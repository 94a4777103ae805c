//! Supervisor integration tests: single-flight slots, line routing,
//! chaining, and cooperative stop cascades, all against a scripted unit
//! of work.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use themata::engine::CancelFlag;
use themata::hub::{BroadcastHub, PhaseEvent};
use themata::job::{
    JobState, JobSupervisor, LineSink, Phase, PhaseParams, SupervisorError, UnitOfWork,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Unit of work that replays scripted lines, then completes, fails, or
/// hangs until cancelled, depending on the phase.
#[derive(Default)]
struct ScriptedUnit {
    lines: Vec<String>,
    fail: HashSet<Phase>,
    hang: HashSet<Phase>,
    starts: Mutex<HashMap<Phase, usize>>,
}

impl ScriptedUnit {
    fn with_lines(lines: Vec<String>) -> Self {
        Self {
            lines,
            ..Default::default()
        }
    }

    fn starts(&self, phase: Phase) -> usize {
        self.starts.lock().unwrap().get(&phase).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UnitOfWork for ScriptedUnit {
    async fn run(
        &self,
        phase: Phase,
        _params: PhaseParams,
        sink: LineSink,
        cancel: CancelFlag,
    ) -> anyhow::Result<()> {
        *self.starts.lock().unwrap().entry(phase).or_default() += 1;

        for line in &self.lines {
            sink.send(line.clone());
        }

        if self.hang.contains(&phase) {
            while !cancel.is_set() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            return Ok(());
        }

        if self.fail.contains(&phase) {
            anyhow::bail!("scripted failure");
        }

        Ok(())
    }
}

fn supervisor_with(unit: Arc<ScriptedUnit>) -> (JobSupervisor, mpsc::Receiver<PhaseEvent>) {
    let hub = BroadcastHub::new();
    let (_id, events) = hub.subscribe();
    (JobSupervisor::new(hub, unit), events)
}

fn params() -> PhaseParams {
    PhaseParams {
        data_file: "cases.json".into(),
        provider: Some("gemini".to_string()),
        model: None,
        instructions: None,
    }
}

async fn next_event(events: &mut mpsc::Receiver<PhaseEvent>) -> PhaseEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("hub closed")
}

/// Consumes events until one matches, returning everything seen.
async fn events_until(
    events: &mut mpsc::Receiver<PhaseEvent>,
    pred: impl Fn(&PhaseEvent) -> bool,
) -> Vec<PhaseEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn completed_run_emits_started_lines_and_completed() {
    let unit = Arc::new(ScriptedUnit::with_lines(vec![
        "Using data file: cases.json".to_string(),
        concat!(
            "PROGRESS_UPDATE:",
            r#"{"case_id":"1","values":["theft"],"#,
            r#""progress":{"processed":1,"total":2,"percentage":50.0,"unique_count":1},"#,
            r#""timestamp":"2025-03-01T12:00:00Z"}"#
        )
        .to_string(),
    ]));
    let (supervisor, mut events) = supervisor_with(unit.clone());

    supervisor.start(Phase::P2, params()).unwrap();
    let seen = events_until(&mut events, PhaseEvent::is_terminal).await;

    assert!(matches!(seen[0], PhaseEvent::Started { phase: Phase::P2 }));
    assert!(seen
        .iter()
        .any(|e| matches!(e, PhaseEvent::Log { text, .. } if text.contains("Using data file"))));
    let progress = seen
        .iter()
        .find_map(|e| match e {
            PhaseEvent::Progress {
                case_id, snapshot, ..
            } => Some((case_id.clone(), *snapshot)),
            _ => None,
        })
        .expect("a progress event");
    assert_eq!(progress.0, "1");
    assert_eq!(progress.1.processed, 1);
    assert!(matches!(
        seen.last(),
        Some(PhaseEvent::Completed { phase: Phase::P2 })
    ));
    assert_eq!(unit.starts(Phase::P2), 1);
}

#[tokio::test]
async fn malformed_payload_lines_are_dropped_not_fatal() {
    let unit = Arc::new(ScriptedUnit::with_lines(vec![
        "PROGRESS_UPDATE:{this is not json".to_string(),
        "still alive".to_string(),
    ]));
    let (supervisor, mut events) = supervisor_with(unit);

    supervisor.start(Phase::P2, params()).unwrap();
    let seen = events_until(&mut events, PhaseEvent::is_terminal).await;

    assert!(!seen
        .iter()
        .any(|e| matches!(e, PhaseEvent::Progress { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, PhaseEvent::Log { text, .. } if text == "still alive")));
    assert!(matches!(
        seen.last(),
        Some(PhaseEvent::Completed { phase: Phase::P2 })
    ));
}

#[tokio::test]
async fn starting_a_running_phase_reports_a_conflict() {
    let mut unit = ScriptedUnit::default();
    unit.hang.insert(Phase::P3);
    let unit = Arc::new(unit);
    let (supervisor, mut events) = supervisor_with(unit.clone());

    supervisor.start(Phase::P3, params()).unwrap();
    assert_eq!(supervisor.status(Phase::P3).state, JobState::Running);

    let second = supervisor.start(Phase::P3, params());
    assert_eq!(second, Err(SupervisorError::AlreadyRunning(Phase::P3)));

    supervisor.stop(Phase::P3).unwrap();
    let seen = events_until(&mut events, PhaseEvent::is_terminal).await;
    assert!(matches!(
        seen.last(),
        Some(PhaseEvent::Stopped { phase: Phase::P3 })
    ));
    // The conflicting start never created a second unit of work.
    assert_eq!(unit.starts(Phase::P3), 1);
}

#[tokio::test]
async fn completed_p3_chains_into_p3b_exactly_once() {
    let unit = Arc::new(ScriptedUnit::default());
    let (supervisor, mut events) = supervisor_with(unit.clone());

    supervisor.start(Phase::P3, params()).unwrap();

    let seen = events_until(
        &mut events,
        |e| matches!(e, PhaseEvent::Completed { phase: Phase::P3b }),
    )
    .await;

    let kinds: Vec<String> = seen
        .iter()
        .map(|e| match e {
            PhaseEvent::Started { phase } => format!("started:{phase}"),
            PhaseEvent::Chained { from, to } => format!("chained:{from}->{to}"),
            PhaseEvent::Completed { phase } => format!("completed:{phase}"),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "started:p3",
            "chained:p3->p3b",
            "completed:p3",
            "started:p3b",
            "completed:p3b",
        ]
    );
    assert_eq!(unit.starts(Phase::P3), 1);
    assert_eq!(unit.starts(Phase::P3b), 1);
}

#[tokio::test]
async fn failed_p3_never_chains() {
    let mut unit = ScriptedUnit::default();
    unit.fail.insert(Phase::P3);
    let unit = Arc::new(unit);
    let (supervisor, mut events) = supervisor_with(unit.clone());

    supervisor.start(Phase::P3, params()).unwrap();
    let seen = events_until(&mut events, PhaseEvent::is_terminal).await;

    match seen.last() {
        Some(PhaseEvent::Failed { phase, error, .. }) => {
            assert_eq!(*phase, Phase::P3);
            assert!(error.contains("scripted failure"));
        }
        other => panic!("expected a failed event, got {other:?}"),
    }

    // Give a would-be chain every chance to fire before asserting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(unit.starts(Phase::P3b), 0);
}

#[tokio::test]
async fn stopping_p3_cascades_to_its_chained_p3b() {
    let mut unit = ScriptedUnit::default();
    unit.hang.insert(Phase::P3b);
    let unit = Arc::new(unit);
    let (supervisor, mut events) = supervisor_with(unit.clone());

    supervisor.start(Phase::P3, params()).unwrap();
    events_until(
        &mut events,
        |e| matches!(e, PhaseEvent::Started { phase: Phase::P3b }),
    )
    .await;

    let ack = supervisor.stop(Phase::P3).unwrap();
    assert_eq!(ack.stopped, vec![Phase::P3, Phase::P3b]);

    let seen = events_until(
        &mut events,
        |e| matches!(e, PhaseEvent::Stopped { phase: Phase::P3b }),
    )
    .await;
    assert!(!seen.is_empty());
    assert_eq!(supervisor.status(Phase::P3b).state, JobState::Idle);
}

#[tokio::test]
async fn stopping_an_idle_phase_reports_nothing_to_stop() {
    let (supervisor, _events) = supervisor_with(Arc::new(ScriptedUnit::default()));
    assert_eq!(
        supervisor.stop(Phase::P4),
        Err(SupervisorError::NothingToStop(Phase::P4))
    );
}

#[tokio::test]
async fn terminated_slots_accept_a_fresh_start() {
    let unit = Arc::new(ScriptedUnit::default());
    let (supervisor, mut events) = supervisor_with(unit.clone());

    supervisor.start(Phase::P2, params()).unwrap();
    events_until(&mut events, PhaseEvent::is_terminal).await;
    assert_eq!(supervisor.status(Phase::P2).state, JobState::Idle);

    supervisor.start(Phase::P2, params()).unwrap();
    events_until(&mut events, PhaseEvent::is_terminal).await;
    assert_eq!(unit.starts(Phase::P2), 2);
}

#[tokio::test]
async fn status_exposes_the_recent_output_handle() {
    let mut unit = ScriptedUnit::with_lines(vec!["first line".to_string()]);
    unit.hang.insert(Phase::P2);
    let unit = Arc::new(unit);
    let (supervisor, mut events) = supervisor_with(unit);

    supervisor.start(Phase::P2, params()).unwrap();
    events_until(
        &mut events,
        |e| matches!(e, PhaseEvent::Log { text, .. } if text == "first line"),
    )
    .await;

    let status = supervisor.status(Phase::P2);
    assert_eq!(status.state, JobState::Running);
    assert!(status.started_at.is_some());
    assert_eq!(status.recent_output, vec!["first line"]);

    supervisor.stop(Phase::P2).unwrap();
    events_until(&mut events, PhaseEvent::is_terminal).await;
}

#[tokio::test]
async fn stop_cascade_does_not_survive_a_fresh_p3_run() {
    // A new start of P3 supersedes the chain record of its previous run:
    // stopping the new P3 run must not touch an unrelated P3b.
    let mut unit = ScriptedUnit::default();
    unit.hang.insert(Phase::P3);
    unit.hang.insert(Phase::P3b);
    let unit = Arc::new(unit);
    let (supervisor, mut events) = supervisor_with(unit.clone());

    // Start P3b on its own, then P3 fresh.
    supervisor.start(Phase::P3b, params()).unwrap();
    supervisor.start(Phase::P3, params()).unwrap();

    let ack = supervisor.stop(Phase::P3).unwrap();
    assert_eq!(ack.stopped, vec![Phase::P3]);

    // P3b keeps running; stop it to wind the test down.
    assert_eq!(supervisor.status(Phase::P3b).state, JobState::Running);
    supervisor.stop(Phase::P3b).unwrap();
    events_until(
        &mut events,
        |e| matches!(e, PhaseEvent::Stopped { phase: Phase::P3b }),
    )
    .await;
}
