//! Single-slot job controller.
//!
//! At most one job is Starting or Running at a time. `submit` claims the slot
//! under a mutex before doing any work and a second caller gets `Busy`. Once
//! the plan is built the job is handed to a supervisor task that owns the
//! engine process and is the only writer of the job's terminal state. Every
//! job ends with exactly one terminal [`JobEvent`], sent after the slot has
//! been released.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use crate::config::EnhanceConfig;
use crate::engine::{Engine, EngineEvent, EngineExit, EngineInvocation, EngineRun};
use crate::error::ProcessingError;
use crate::ffprobe::MetadataProbe;
use crate::job::{Job, JobState, ProcessingResult};
use crate::pipeline::{self, Pipeline};
use crate::plan::{self, ExecutionPlan};
use crate::progress::{EngineProgress, ProgressRelay, ProgressSample};
use crate::quality::EncodingParams;
use crate::request::ProcessingRequest;

/// Notification delivered to the submitter of a job
#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress(ProgressSample),
    Completed(ProcessingResult),
    Failed(ProcessingError),
    Cancelled,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress(_))
    }
}

/// Result of a `cancel()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Engine exited within the grace period
    Cancelled,
    /// Engine ignored the graceful request and was killed
    ForceKilled,
    /// No job was running
    NotRunning,
    /// Another cancel for the same job is already in flight
    AlreadyCancelling,
}

type CancelRequest = oneshot::Sender<CancelOutcome>;

#[derive(Default)]
struct Slot {
    job: Option<Job>,
    cancel_tx: Option<oneshot::Sender<CancelRequest>>,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    last_job: Mutex<Option<Job>>,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn last_job(&self) -> MutexGuard<'_, Option<Job>> {
        self.last_job.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the job through its terminal state back to `Idle` and free the slot
    fn retire(&self, job_id: &str, state: JobState, reason: Option<String>) {
        let job = {
            let mut slot = self.slot();
            match slot.job.as_ref() {
                Some(job) if job.id == job_id => {}
                _ => {
                    error!("Job {}: not in the slot when retiring", job_id);
                    return;
                }
            }
            slot.cancel_tx = None;
            slot.job.take()
        };

        if let Some(mut job) = job {
            job.transition(state);
            job.transition(JobState::Idle);
            job.reason = reason;
            *self.last_job() = Some(job);
        }
    }
}

/// Releases the slot if `submit` returns (or is dropped) before the job is running
struct StartGuard<'a> {
    shared: &'a Shared,
    job_id: String,
    reason: Option<String>,
    armed: bool,
}

impl StartGuard<'_> {
    fn fail(&mut self, err: &ProcessingError) {
        self.reason = Some(err.to_string());
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let reason = self.reason.take().unwrap_or_else(|| "submission aborted".to_string());
            debug!("Job {}: released during start ({})", self.job_id, reason);
            self.shared.retire(&self.job_id, JobState::Failed, Some(reason));
        }
    }
}

/// Everything needed to run a request, without having run it
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub plan: ExecutionPlan,
    pub pipeline: Pipeline,
    pub invocation: EngineInvocation,
}

/// Caller's side of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    pub id: String,
    pub plan: ExecutionPlan,
    pub pipeline: Pipeline,
    events: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobHandle {
    /// Next progress or terminal event; None after the terminal event
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Skip progress and wait for the outcome
    pub async fn wait(mut self) -> Result<ProcessingResult, ProcessingError> {
        while let Some(event) = self.events.recv().await {
            match event {
                JobEvent::Progress(_) => continue,
                JobEvent::Completed(result) => return Ok(result),
                JobEvent::Failed(err) => return Err(err),
                JobEvent::Cancelled => return Err(ProcessingError::Cancelled),
            }
        }
        Err(ProcessingError::runtime(None, None, "job supervisor stopped without reporting a result"))
    }
}

pub struct JobController {
    shared: Arc<Shared>,
    probe: Arc<dyn MetadataProbe>,
    engine: Arc<dyn Engine>,
    video_codec: String,
    job_timeout: Duration,
    cancel_grace: Duration,
}

impl JobController {
    pub fn new(cfg: &EnhanceConfig, probe: Arc<dyn MetadataProbe>, engine: Arc<dyn Engine>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            probe,
            engine,
            video_codec: cfg.video_codec.clone(),
            job_timeout: cfg.job_timeout(),
            cancel_grace: cfg.cancel_grace(),
        }
    }

    pub fn with_timeouts(mut self, job_timeout: Duration, cancel_grace: Duration) -> Self {
        self.job_timeout = job_timeout;
        self.cancel_grace = cancel_grace;
        self
    }

    pub fn state(&self) -> JobState {
        self.shared.slot().job.as_ref().map(|j| j.state).unwrap_or(JobState::Idle)
    }

    /// Snapshot of the job holding the slot
    pub fn current_job(&self) -> Option<Job> {
        self.shared.slot().job.clone()
    }

    /// Snapshot of the most recently finished job, already back in `Idle`.
    /// [`Job::outcome`] tells how it ended.
    pub fn last_job(&self) -> Option<Job> {
        self.shared.last_job().clone()
    }

    /// Plan and start a job.
    ///
    /// Validation, probe and planning errors are returned here; everything
    /// after the engine is launched arrives on the handle.
    pub async fn submit(&self, request: ProcessingRequest) -> Result<JobHandle, ProcessingError> {
        let job_id = {
            let mut slot = self.shared.slot();
            if let Some(active) = slot.job.as_ref().filter(|j| j.state.is_active()) {
                warn!("Rejecting submission, job {} is {}", active.id, active.state);
                return Err(ProcessingError::Busy);
            }
            let job = Job::new(request.clone());
            let id = job.id.clone();
            slot.job = Some(job);
            id
        };

        let mut guard = StartGuard {
            shared: &self.shared,
            job_id: job_id.clone(),
            reason: None,
            armed: true,
        };
        info!("Job {}: starting {}", job_id, request.input_path.display());

        let PreparedJob { plan, pipeline, invocation } = match self.prepare(&request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Job {}: {}", job_id, e);
                guard.fail(&e);
                return Err(e);
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut slot = self.shared.slot();
            match slot.job.as_mut() {
                Some(job) if job.id == job_id => {
                    job.plan = Some(plan.clone());
                    job.pipeline = Some(pipeline.clone());
                    job.transition(JobState::Running);
                }
                _ => {
                    return Err(ProcessingError::runtime(None, None, "job slot was released during start"));
                }
            }
            slot.cancel_tx = Some(cancel_tx);
        }
        guard.disarm();

        let supervisor = Supervisor {
            shared: self.shared.clone(),
            job_id: job_id.clone(),
            request,
            plan: plan.clone(),
            events: events_tx,
            deadline: Instant::now() + self.job_timeout,
            job_timeout: self.job_timeout,
            cancel_grace: self.cancel_grace,
        };
        tokio::spawn(supervisor.run(self.engine.clone(), invocation, cancel_rx));

        Ok(JobHandle {
            id: job_id,
            plan,
            pipeline,
            events: events_rx,
        })
    }

    /// Validate, probe and plan a request without claiming the slot or
    /// launching the engine
    pub async fn prepare(&self, request: &ProcessingRequest) -> Result<PreparedJob, ProcessingError> {
        request.validate()?;

        let metadata = self
            .probe
            .probe(&request.input_path)
            .await
            .map_err(|e| ProcessingError::ProbeFailed(format!("{:#}", e)))?;

        let plan = plan::optimize(request, &metadata)?;
        let pipeline = pipeline::build(&plan, request.enhancement_mode, request.noise_reduction);
        let invocation = EngineInvocation {
            input: request.input_path.clone(),
            output: request.output_path.clone(),
            pipeline: pipeline.clone(),
            params: EncodingParams::for_quality(plan.effective_quality),
            video_codec: self.video_codec.clone(),
            duration_secs: plan.duration_secs,
        };
        Ok(PreparedJob { plan, pipeline, invocation })
    }

    /// Stop the running job, escalating to a forced kill after the grace period
    pub async fn cancel(&self) -> CancelOutcome {
        let cancel_tx = {
            let mut slot = self.shared.slot();
            match slot.job.as_ref().map(|j| j.state) {
                Some(JobState::Running) => match slot.cancel_tx.take() {
                    Some(tx) => tx,
                    None => return CancelOutcome::AlreadyCancelling,
                },
                _ => return CancelOutcome::NotRunning,
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if cancel_tx.send(ack_tx).is_err() {
            // Supervisor finished between the check and the send
            return CancelOutcome::NotRunning;
        }
        ack_rx.await.unwrap_or(CancelOutcome::NotRunning)
    }
}

enum Outcome {
    Completed(ProcessingResult),
    Failed(ProcessingError),
    Cancelled(CancelRequest, CancelOutcome),
}

/// Owns one running job until it reaches a terminal state
struct Supervisor {
    shared: Arc<Shared>,
    job_id: String,
    request: ProcessingRequest,
    plan: ExecutionPlan,
    events: mpsc::UnboundedSender<JobEvent>,
    deadline: Instant,
    job_timeout: Duration,
    cancel_grace: Duration,
}

impl Supervisor {
    async fn run(
        self,
        engine: Arc<dyn Engine>,
        invocation: EngineInvocation,
        mut cancel_rx: oneshot::Receiver<CancelRequest>,
    ) {
        let mut run = match engine.start(invocation) {
            Ok(run) => run,
            Err(e) => {
                error!("Job {}: {}", self.job_id, e);
                self.finish(Outcome::Failed(e));
                return;
            }
        };
        info!("Job {}: engine started", self.job_id);

        let mut relay = ProgressRelay::new();
        let mut cancel_open = true;
        let timeout = tokio::time::sleep_until(self.deadline);
        tokio::pin!(timeout);

        let outcome = loop {
            // An exit already queued wins over a cancel or timeout arriving at the same time
            tokio::select! {
                biased;
                event = run.events.recv() => match event {
                    Some(EngineEvent::Progress(progress)) => self.relay(&mut relay, &progress),
                    Some(EngineEvent::Exited(exit)) => break self.complete(exit).await,
                    None => {
                        break Outcome::Failed(ProcessingError::runtime(
                            None,
                            None,
                            "engine stopped without reporting an exit status",
                        ))
                    }
                },
                request = &mut cancel_rx, if cancel_open => {
                    cancel_open = false;
                    if let Ok(ack) = request {
                        let result = self.stop(&mut run).await;
                        break Outcome::Cancelled(ack, result);
                    }
                }
                _ = &mut timeout => {
                    warn!("Job {}: timed out after {:?}, killing engine", self.job_id, self.job_timeout);
                    run.control.kill();
                    self.drain_until_exit(&mut run).await;
                    break Outcome::Failed(ProcessingError::Timeout { secs: self.job_timeout.as_secs() });
                }
            }
        };

        self.finish(outcome);
    }

    fn relay(&self, relay: &mut ProgressRelay, progress: &EngineProgress) {
        if let Some(sample) = relay.accept(progress) {
            if let Some(job) = self.shared.slot().job.as_mut() {
                job.last_percent = relay.last_percent();
            }
            let _ = self.events.send(JobEvent::Progress(sample));
        }
    }

    /// Graceful stop, escalating to kill when the grace period runs out
    async fn stop(&self, run: &mut EngineRun) -> CancelOutcome {
        info!("Job {}: cancelling", self.job_id);
        run.control.terminate();

        let grace = tokio::time::sleep(self.cancel_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                event = run.events.recv() => match event {
                    Some(EngineEvent::Progress(_)) => continue,
                    Some(EngineEvent::Exited(_)) | None => return CancelOutcome::Cancelled,
                },
                _ = &mut grace => {
                    warn!("Job {}: engine ignored termination for {:?}, killing", self.job_id, self.cancel_grace);
                    run.control.kill();
                    return CancelOutcome::ForceKilled;
                }
            }
        }
    }

    /// Wait for the engine to be reaped after a kill, bounded by the grace period
    async fn drain_until_exit(&self, run: &mut EngineRun) {
        let reaped = tokio::time::timeout(self.cancel_grace, async {
            while let Some(event) = run.events.recv().await {
                if matches!(event, EngineEvent::Exited(_)) {
                    break;
                }
            }
        })
        .await;
        if reaped.is_err() {
            warn!("Job {}: engine still running after kill", self.job_id);
        }
    }

    async fn complete(&self, exit: EngineExit) -> Outcome {
        if !exit.success() {
            let err = ProcessingError::runtime(exit.code, exit.signal, &exit.stderr_tail);
            error!("Job {}: engine failed (code={:?} signal={:?}): {}", self.job_id, exit.code, exit.signal, err);
            return Outcome::Failed(err);
        }

        let output = &self.request.output_path;
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Outcome::Completed(ProcessingResult {
                job_id: self.job_id.clone(),
                input_path: self.request.input_path.clone(),
                output_path: output.clone(),
                output_size_bytes: meta.len(),
                plan: self.plan.clone(),
            }),
            Ok(_) => Outcome::Failed(ProcessingError::OutputVerificationFailed(format!(
                "{} is empty",
                output.display()
            ))),
            Err(e) => Outcome::Failed(ProcessingError::OutputVerificationFailed(format!(
                "{}: {}",
                output.display(),
                e
            ))),
        }
    }

    /// Release the slot, then report. Cancel acks go out last so a caller
    /// awaiting `cancel()` sees the controller idle.
    fn finish(self, outcome: Outcome) {
        let (state, reason, event, ack) = match outcome {
            Outcome::Completed(result) => {
                info!("Job {}: completed, output {} ({})", self.job_id, result.output_path.display(), result.size_display());
                (JobState::Completed, None, JobEvent::Completed(result), None)
            }
            Outcome::Failed(err) => {
                error!("Job {}: failed: {}", self.job_id, err);
                (JobState::Failed, Some(err.to_string()), JobEvent::Failed(err), None)
            }
            Outcome::Cancelled(ack, result) => {
                info!("Job {}: cancelled ({:?})", self.job_id, result);
                (
                    JobState::Cancelled,
                    Some(ProcessingError::Cancelled.to_string()),
                    JobEvent::Cancelled,
                    Some((ack, result)),
                )
            }
        };

        self.shared.retire(&self.job_id, state, reason);
        if self.events.send(event).is_err() {
            debug!("Job {}: handle dropped before the terminal event", self.job_id);
        }
        if let Some((ack, result)) = ack {
            let _ = ack.send(result);
        }
    }
}
