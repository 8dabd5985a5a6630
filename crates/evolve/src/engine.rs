//! Contract between the job controller and a transcoding engine.
//!
//! An engine is started with an [`EngineInvocation`] and hands back an
//! [`EngineRun`]: a stream of [`EngineEvent`]s that always ends with exactly
//! one `Exited`, plus an [`EngineControl`] for sending termination signals.
//! Signalling a process that has already exited is a no-op.

use std::path::PathBuf;
use tokio::sync::mpsc;
use crate::error::ProcessingError;
use crate::pipeline::Pipeline;
use crate::progress::EngineProgress;
use crate::quality::EncodingParams;

/// Everything the engine needs to produce one output file
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    pub input: PathBuf,
    pub output: PathBuf,
    pub pipeline: Pipeline,
    pub params: EncodingParams,
    pub video_codec: String,
    /// Used to turn elapsed media time into a percentage
    pub duration_secs: Option<f64>,
}

/// How the engine process ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineExit {
    pub code: Option<i32>,
    /// Terminating signal on unix
    pub signal: Option<i32>,
    /// Tail of the engine's diagnostic output
    pub stderr_tail: String,
}

impl EngineExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress(EngineProgress),
    Exited(EngineExit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    /// Ask the engine to stop and finalize (SIGTERM)
    Terminate,
    /// Stop immediately (SIGKILL)
    Kill,
}

/// Sends termination signals to a running engine
#[derive(Debug, Clone)]
pub struct EngineControl {
    tx: mpsc::UnboundedSender<EngineSignal>,
}

impl EngineControl {
    pub fn new(tx: mpsc::UnboundedSender<EngineSignal>) -> Self {
        Self { tx }
    }

    pub fn terminate(&self) {
        self.send(EngineSignal::Terminate);
    }

    pub fn kill(&self) {
        self.send(EngineSignal::Kill);
    }

    fn send(&self, signal: EngineSignal) {
        // Receiver is gone once the process has been reaped
        if self.tx.send(signal).is_err() {
            log::debug!("Engine already exited, ignoring {:?}", signal);
        }
    }
}

/// A started engine process
#[derive(Debug)]
pub struct EngineRun {
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
    pub control: EngineControl,
}

/// Something that can run an [`EngineInvocation`].
///
/// `start` must be called from within a tokio runtime; it returns as soon as
/// the process is launched.
pub trait Engine: Send + Sync {
    fn start(&self, invocation: EngineInvocation) -> Result<EngineRun, ProcessingError>;
}
