use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::request::{EnhancementMode, OutputQuality};

/// Configuration for the enhancement engine and job controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Path to the ffmpeg binary (PATH lookup when bare)
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary (PATH lookup when bare)
    pub ffprobe_bin: PathBuf,
    /// Wall-clock limit for a single job, in seconds
    pub job_timeout_secs: u64,
    /// Time allowed between SIGTERM and SIGKILL when cancelling
    pub cancel_grace_secs: u64,
    /// Time allowed for `ffmpeg -version` during the availability check
    pub engine_check_timeout_secs: u64,
    /// Video encoder passed to `-c:v`
    pub video_codec: String,
    /// Request values used when the caller leaves a field unset
    pub defaults: RequestDefaults,
}

/// Default request values, mirroring what the desktop front-end preselects
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub scale_factor: f64,
    pub enhancement_mode: EnhancementMode,
    pub noise_reduction: u8,
    pub output_quality: OutputQuality,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            scale_factor: 4.0,
            enhancement_mode: EnhancementMode::Standard,
            noise_reduction: 50,
            output_quality: OutputQuality::Ultra,
        }
    }
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl EnhanceConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            job_timeout_secs: 30 * 60,
            cancel_grace_secs: 5,
            engine_check_timeout_secs: 5,
            video_codec: "libx264".to_string(),
            defaults: RequestDefaults::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_path_yields_defaults() {
        let cfg = EnhanceConfig::load_config(None).unwrap();
        assert_eq!(cfg.job_timeout_secs, 1800);
        assert_eq!(cfg.cancel_grace_secs, 5);
        assert_eq!(cfg.video_codec, "libx264");

        let cfg = EnhanceConfig::load_config(Some(Path::new("/nonexistent/evolve.toml"))).unwrap();
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_partial_toml_keeps_remaining_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "ffmpeg_bin = \"/opt/ffmpeg/bin/ffmpeg\"").unwrap();
        writeln!(file, "job_timeout_secs = 60").unwrap();
        writeln!(file, "[defaults]").unwrap();
        writeln!(file, "output_quality = \"draft\"").unwrap();

        let cfg = EnhanceConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(cfg.job_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.cancel_grace(), Duration::from_secs(5));
        assert_eq!(cfg.defaults.output_quality, OutputQuality::Draft);
        assert_eq!(cfg.defaults.noise_reduction, 50);
    }

    #[test]
    fn test_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"cancel_grace_secs": 2, "defaults": {{"enhancement_mode": "anime"}}}}"#).unwrap();

        let cfg = EnhanceConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.cancel_grace_secs, 2);
        assert_eq!(cfg.defaults.enhancement_mode, EnhancementMode::Anime);
        assert_eq!(cfg.defaults.scale_factor, 4.0);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "not json").unwrap();
        let err = EnhanceConfig::load_config(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse JSON config"));
    }
}
