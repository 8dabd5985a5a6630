use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use crate::pipeline::Pipeline;
use crate::plan::ExecutionPlan;
use crate::request::ProcessingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Holds the single job slot
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Starting | JobState::Running)
    }

    /// Edges of `Idle -> Starting -> Running -> {Completed, Failed, Cancelled} -> Idle`.
    ///
    /// Starting may fail directly (probe or launch errors).
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Completed, Idle)
                | (Failed, Idle)
                | (Cancelled, Idle)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Run-time record of one enhancement job
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub request: ProcessingRequest,
    pub plan: Option<ExecutionPlan>,
    pub pipeline: Option<Pipeline>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last percent forwarded to the caller
    pub last_percent: Option<u8>,
    /// Failure or cancellation reason
    pub reason: Option<String>,
    pub history: Vec<(JobState, DateTime<Utc>)>,
}

impl Job {
    /// A freshly claimed job, already in `Starting`
    pub fn new(request: ProcessingRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            request,
            plan: None,
            pipeline: None,
            state: JobState::Starting,
            created_at: now,
            started_at: None,
            finished_at: None,
            last_percent: None,
            reason: None,
            history: vec![(JobState::Idle, now), (JobState::Starting, now)],
        }
    }

    /// Move to `next`, returning false (and leaving the job untouched) on an illegal edge
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            log::debug!("Job {}: ignoring illegal transition {} -> {}", self.id, self.state, next);
            return false;
        }

        let now = Utc::now();
        match next {
            JobState::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.state = next;
        self.history.push((next, now));
        true
    }

    pub fn states(&self) -> Vec<JobState> {
        self.history.iter().map(|(s, _)| *s).collect()
    }

    /// Terminal state the job reached, even after it has returned to `Idle`
    pub fn outcome(&self) -> Option<JobState> {
        self.history.iter().rev().map(|(s, _)| *s).find(JobState::is_terminal)
    }
}

/// Outcome of a successful job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    pub plan: ExecutionPlan,
}

impl ProcessingResult {
    /// Output size in human-readable form, e.g. "12.4 MB"
    pub fn size_display(&self) -> String {
        humansize::format_size(self.output_size_bytes, humansize::DECIMAL)
    }
}
