//! Single-flight job supervision.
//!
//! One slot per phase name. Starting an occupied slot reports a conflict
//! and changes nothing; termination clears the slot and broadcasts the
//! terminal event; a completed candidate-theme run chains straight into
//! consolidation. All slot mutation happens through `start`/`stop` and
//! the drive loop's terminal transition, never through ad hoc writes.

use super::chain;
use super::protocol::{self, ParsedLine};
use super::{JobState, Phase};
use crate::engine::CancelFlag;
use crate::hub::{BroadcastHub, LogLevel, PhaseEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Lines of unit output retained per running job.
pub const OUTPUT_LOG_CAPACITY: usize = 200;

/// Parameters a phase run is started with; the chained successor reuses
/// them unchanged.
#[derive(Debug, Clone, Default)]
pub struct PhaseParams {
    pub data_file: PathBuf,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub instructions: Option<String>,
}

/// Write end of the line-oriented channel a unit of work reports through.
#[derive(Debug, Clone)]
pub struct LineSink {
    tx: mpsc::UnboundedSender<String>,
}

impl LineSink {
    /// A detached sink and its read end, for driving a unit of work
    /// outside the supervisor.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits one line. Sending after the supervisor went away is a no-op.
    pub fn send(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }
}

/// The executable routine performing one phase's analysis.
///
/// Progress is reported through `sink` in the line protocol; `cancel` is
/// the cooperative stop signal, checked between cases. Returning `Ok`
/// completes the job, returning `Err` fails it.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run(
        &self,
        phase: Phase,
        params: PhaseParams,
        sink: LineSink,
        cancel: CancelFlag,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("phase {0} is already running")]
    AlreadyRunning(Phase),

    #[error("no running job to stop for phase {0}")]
    NothingToStop(Phase),
}

/// Point-in-time view of one phase's slot.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    /// Tail of the unit's output, as an opaque progress handle.
    pub recent_output: Vec<String>,
}

/// Combined acknowledgment for a stop request, naming the requested
/// phase and any auto-chained job stopped along with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopAck {
    pub stopped: Vec<Phase>,
}

struct RunningJob {
    started_at: DateTime<Utc>,
    cancel: CancelFlag,
    output: Arc<Mutex<VecDeque<String>>>,
}

struct SupervisorInner {
    jobs: Mutex<HashMap<Phase, RunningJob>>,
    /// Parent phase -> child it auto-started; outlives the parent's slot
    /// so a later stop of the parent still cascades.
    chained: Mutex<HashMap<Phase, Phase>>,
    hub: BroadcastHub,
    unit: Arc<dyn UnitOfWork>,
}

#[derive(Clone)]
pub struct JobSupervisor {
    inner: Arc<SupervisorInner>,
}

impl JobSupervisor {
    pub fn new(hub: BroadcastHub, unit: Arc<dyn UnitOfWork>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                jobs: Mutex::new(HashMap::new()),
                chained: Mutex::new(HashMap::new()),
                hub,
                unit,
            }),
        }
    }

    /// Launches a phase asynchronously and returns immediately.
    ///
    /// Fails with [`SupervisorError::AlreadyRunning`] if the slot is
    /// occupied; a conflicting start never queues a second run.
    pub fn start(&self, phase: Phase, params: PhaseParams) -> Result<(), SupervisorError> {
        let cancel = CancelFlag::new();
        let output = Arc::new(Mutex::new(VecDeque::new()));

        {
            let mut jobs = self.inner.jobs.lock().unwrap();
            if jobs.contains_key(&phase) {
                return Err(SupervisorError::AlreadyRunning(phase));
            }
            jobs.insert(
                phase,
                RunningJob {
                    started_at: Utc::now(),
                    cancel: cancel.clone(),
                    output: output.clone(),
                },
            );
        }

        // A fresh run supersedes whatever this phase chained last time.
        self.inner.chained.lock().unwrap().remove(&phase);

        info!(%phase, data_file = %params.data_file.display(), "starting unit of work");
        self.inner.hub.publish(PhaseEvent::Started { phase });

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.drive(phase, params, cancel, output).await;
        });

        Ok(())
    }

    /// Requests cooperative termination of a running phase and of any job
    /// auto-chained from it. Returns one acknowledgment naming both.
    pub fn stop(&self, phase: Phase) -> Result<StopAck, SupervisorError> {
        let child = self.inner.chained.lock().unwrap().get(&phase).copied();

        let mut stopped = Vec::new();
        {
            let jobs = self.inner.jobs.lock().unwrap();
            if let Some(job) = jobs.get(&phase) {
                job.cancel.set();
                stopped.push(phase);
            }
            if let Some(child) = child {
                if let Some(job) = jobs.get(&child) {
                    job.cancel.set();
                    if stopped.is_empty() {
                        // The parent already terminated; the ack still
                        // names it so the caller sees the full cascade.
                        stopped.push(phase);
                    }
                    stopped.push(child);
                }
            }
        }

        if stopped.is_empty() {
            return Err(SupervisorError::NothingToStop(phase));
        }

        info!(?stopped, "stop requested");
        Ok(StopAck { stopped })
    }

    /// Pure read of the phase's current state and progress handle.
    pub fn status(&self, phase: Phase) -> JobStatus {
        let jobs = self.inner.jobs.lock().unwrap();
        match jobs.get(&phase) {
            Some(job) => JobStatus {
                state: JobState::Running,
                started_at: Some(job.started_at),
                recent_output: job.output.lock().unwrap().iter().cloned().collect(),
            },
            None => JobStatus {
                state: JobState::Idle,
                started_at: None,
                recent_output: Vec::new(),
            },
        }
    }

    async fn drive(
        self,
        phase: Phase,
        params: PhaseParams,
        cancel: CancelFlag,
        output: Arc<Mutex<VecDeque<String>>>,
    ) {
        let (sink, mut rx) = LineSink::channel();
        let unit = self.inner.unit.clone();
        let unit_params = params.clone();
        let unit_cancel = cancel.clone();

        let work = tokio::spawn(async move {
            unit.run(phase, unit_params, sink, unit_cancel).await
        });

        // The sink is owned by the unit task; the loop ends when the unit
        // finishes and the channel closes.
        while let Some(line) = rx.recv().await {
            record_output(&output, &line);
            self.route_line(phase, &line);
        }

        let outcome = work.await;
        let terminal = if cancel.is_set() {
            JobState::Stopped
        } else {
            match &outcome {
                Ok(Ok(())) => JobState::Completed,
                Ok(Err(_)) | Err(_) => JobState::Failed,
            }
        };

        self.inner.jobs.lock().unwrap().remove(&phase);

        match terminal {
            JobState::Completed => {
                info!(%phase, "unit of work completed");
                let next = chain::next_phase(phase);
                if let Some(next) = next {
                    self.inner.hub.publish(PhaseEvent::Chained { from: phase, to: next });
                }
                self.inner.hub.publish(PhaseEvent::Completed { phase });
                if let Some(next) = next {
                    self.start_chained(phase, next, params);
                }
            }
            JobState::Stopped => {
                info!(%phase, "unit of work stopped");
                self.inner.hub.publish(PhaseEvent::Stopped { phase });
            }
            _ => {
                let message = match outcome {
                    Ok(Err(err)) => format!("{err:#}"),
                    Err(join_err) => format!("unit of work crashed: {join_err}"),
                    Ok(Ok(())) => unreachable!("completed runs are handled above"),
                };
                error!(%phase, error = %message, "unit of work failed");
                self.inner.hub.publish(PhaseEvent::Failed {
                    phase,
                    error: message,
                    exit_code: Some(1),
                });
            }
        }

        // Once a chained child terminates, its parent link is spent.
        self.inner
            .chained
            .lock()
            .unwrap()
            .retain(|_, child| *child != phase);
    }

    fn start_chained(&self, from: Phase, to: Phase, params: PhaseParams) {
        // Record the link before the child becomes observable, so a stop
        // of the parent cascades from the first instant of the child run.
        self.inner.chained.lock().unwrap().insert(from, to);
        if let Err(err) = self.start(to, params) {
            warn!(%from, %to, error = %err, "failed to start chained phase");
            self.inner.chained.lock().unwrap().remove(&from);
        }
    }

    fn route_line(&self, phase: Phase, line: &str) {
        match protocol::parse_line(line) {
            ParsedLine::Progress(payload) => {
                self.inner.hub.publish(PhaseEvent::Progress {
                    phase,
                    case_id: payload.case_id,
                    values: payload.values,
                    snapshot: payload.progress,
                    timestamp: payload.timestamp,
                });
            }
            ParsedLine::Stage(payload) => {
                self.inner.hub.publish(PhaseEvent::PhaseChange {
                    phase,
                    stage: payload.stage,
                    details: payload.details,
                    timestamp: payload.timestamp,
                });
            }
            ParsedLine::Bulk(payload) => {
                self.inner.hub.publish(PhaseEvent::BulkProgress {
                    phase,
                    current: payload.current,
                    total: payload.total,
                    status: payload.status,
                });
            }
            ParsedLine::Log(text) => {
                if !text.is_empty() {
                    self.inner.hub.publish(PhaseEvent::Log {
                        phase,
                        text,
                        level: LogLevel::Info,
                    });
                }
            }
            ParsedLine::Malformed { tag, error } => {
                warn!(%phase, tag, %error, "dropping malformed payload line");
            }
        }
    }
}

fn record_output(output: &Arc<Mutex<VecDeque<String>>>, line: &str) {
    let mut log = output.lock().unwrap();
    if log.len() == OUTPUT_LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(line.to_string());
}
