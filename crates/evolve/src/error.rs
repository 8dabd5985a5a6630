use serde::Serialize;
use thiserror::Error;

/// Sub-classification of a non-zero engine exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFailureKind {
    /// Process killed under memory pressure
    ResourceExhausted,
    DiskFull,
    PermissionDenied,
    CorruptInput,
    Unknown,
}

impl RuntimeFailureKind {
    /// Classify an engine failure from its terminating signal and stderr text
    pub fn classify(signal: Option<i32>, message: &str) -> Self {
        const SIGKILL: i32 = 9;

        if signal == Some(SIGKILL)
            || message.contains("SIGKILL")
            || message.contains("Killed")
            || message.contains("Cannot allocate memory")
        {
            RuntimeFailureKind::ResourceExhausted
        } else if message.contains("No space left") {
            RuntimeFailureKind::DiskFull
        } else if message.contains("Permission denied") {
            RuntimeFailureKind::PermissionDenied
        } else if message.contains("Invalid data") {
            RuntimeFailureKind::CorruptInput
        } else {
            RuntimeFailureKind::Unknown
        }
    }

    /// Actionable message shown to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            RuntimeFailureKind::ResourceExhausted => {
                "Processing was stopped due to high memory usage. Try a smaller scale factor or lower quality setting."
            }
            RuntimeFailureKind::DiskFull => "Not enough disk space for the output file.",
            RuntimeFailureKind::PermissionDenied => {
                "Permission denied. Check file permissions and try a different output location."
            }
            RuntimeFailureKind::CorruptInput => "Invalid video format or corrupted input file.",
            RuntimeFailureKind::Unknown => "Video processing failed",
        }
    }
}

/// Flat tag for a [`ProcessingError`], convenient for matching and serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ProbeFailed,
    Busy,
    EngineStartFailed,
    EngineRuntimeFailure(RuntimeFailureKind),
    OutputVerificationFailed,
    Timeout,
    Cancelled,
}

/// Errors produced while planning or running an enhancement job
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to probe input: {0}")]
    ProbeFailed(String),

    #[error("another video is currently being processed")]
    Busy,

    #[error("failed to start ffmpeg: {0}")]
    EngineStartFailed(String),

    #[error("{}", .kind.user_message())]
    EngineRuntimeFailure {
        kind: RuntimeFailureKind,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("output file verification failed: {0}")]
    OutputVerificationFailed(String),

    #[error("Processing timed out after {secs}s. Try with smaller scale factor or shorter video.")]
    Timeout { secs: u64 },

    #[error("processing was cancelled")]
    Cancelled,
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::InvalidInput(_) => ErrorKind::InvalidInput,
            ProcessingError::ProbeFailed(_) => ErrorKind::ProbeFailed,
            ProcessingError::Busy => ErrorKind::Busy,
            ProcessingError::EngineStartFailed(_) => ErrorKind::EngineStartFailed,
            ProcessingError::EngineRuntimeFailure { kind, .. } => ErrorKind::EngineRuntimeFailure(*kind),
            ProcessingError::OutputVerificationFailed(_) => ErrorKind::OutputVerificationFailed,
            ProcessingError::Timeout { .. } => ErrorKind::Timeout,
            ProcessingError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Build a runtime failure from an engine exit, classifying it on the way
    pub fn runtime(exit_code: Option<i32>, signal: Option<i32>, stderr: &str) -> Self {
        ProcessingError::EngineRuntimeFailure {
            kind: RuntimeFailureKind::classify(signal, stderr),
            exit_code,
            detail: stderr.to_string(),
        }
    }

    /// Cancellation is user-initiated and is not reported as a failure
    pub fn is_failure(&self) -> bool {
        !matches!(self, ProcessingError::Cancelled)
    }
}
