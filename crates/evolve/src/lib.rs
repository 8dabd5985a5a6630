pub mod config;
pub mod error;
pub mod request;
pub mod ffprobe;
pub mod plan;
pub mod pipeline;
pub mod quality;
pub mod progress;
pub mod engine;
pub mod ffmpeg_native;
pub mod job;
pub mod controller;

pub use config::EnhanceConfig;
pub use controller::{CancelOutcome, JobController, JobEvent, JobHandle, PreparedJob};
pub use error::{ErrorKind, ProcessingError, RuntimeFailureKind};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream, FfprobeProbe, MetadataProbe, ProbedMetadata};
pub use ffmpeg_native::{FFmpegManager, FfmpegEngine};
pub use job::{Job, JobState, ProcessingResult};
pub use pipeline::{FilterStage, Pipeline};
pub use plan::{ExecutionPlan, PlanAdjustment};
pub use progress::ProgressSample;
pub use request::{EnhancementMode, OutputQuality, ProcessingRequest};
