use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::ProcessingError;

/// Named preset selecting the scaling algorithm and sharpen/blur style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementMode {
    #[default]
    Standard,
    Sharp,
    Smooth,
    Anime,
}

impl EnhancementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnhancementMode::Standard => "standard",
            EnhancementMode::Sharp => "sharp",
            EnhancementMode::Smooth => "smooth",
            EnhancementMode::Anime => "anime",
        }
    }
}

impl fmt::Display for EnhancementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnhancementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(EnhancementMode::Standard),
            "sharp" => Ok(EnhancementMode::Sharp),
            "smooth" => Ok(EnhancementMode::Smooth),
            "anime" => Ok(EnhancementMode::Anime),
            other => Err(format!(
                "unknown enhancement mode '{}' (expected standard, sharp, smooth or anime)",
                other
            )),
        }
    }
}

/// Target output quality, ordered from fastest to most faithful
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputQuality {
    Draft,
    #[default]
    High,
    Ultra,
    Lossless,
}

impl OutputQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputQuality::Draft => "draft",
            OutputQuality::High => "high",
            OutputQuality::Ultra => "ultra",
            OutputQuality::Lossless => "lossless",
        }
    }
}

impl fmt::Display for OutputQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(OutputQuality::Draft),
            "high" => Ok(OutputQuality::High),
            "ultra" => Ok(OutputQuality::Ultra),
            "lossless" => Ok(OutputQuality::Lossless),
            other => Err(format!(
                "unknown output quality '{}' (expected draft, high, ultra or lossless)",
                other
            )),
        }
    }
}

/// A user's enhancement request, immutable once submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub scale_factor: f64,
    pub enhancement_mode: EnhancementMode,
    /// User-facing strength, 0-100
    pub noise_reduction: u8,
    pub output_quality: OutputQuality,
}

impl ProcessingRequest {
    /// Reject values the optimizer cannot reason about
    pub fn validate(&self) -> Result<(), ProcessingError> {
        if !self.scale_factor.is_finite() || self.scale_factor < 1.0 {
            return Err(ProcessingError::InvalidInput(format!(
                "scale factor must be a number >= 1, got {}",
                self.scale_factor
            )));
        }
        if self.noise_reduction > 100 {
            return Err(ProcessingError::InvalidInput(format!(
                "noise reduction must be between 0 and 100, got {}",
                self.noise_reduction
            )));
        }
        if self.input_path == self.output_path {
            return Err(ProcessingError::InvalidInput(
                "output path must differ from input path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default output location: `<stem>_enhanced.mp4` beside the input
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("enhanced-video");
    input.with_file_name(format!("{}_enhanced.mp4", stem))
}
