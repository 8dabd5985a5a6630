use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use crate::config::EnhanceConfig;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    /// Seconds as a decimal string, e.g. "93.120000"
    pub duration: Option<String>,
    /// Bits per second as a decimal string
    pub bit_rate: Option<String>,
    /// File size in bytes as a decimal string
    pub size: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
}

/// What the core needs to know about an input file
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProbedMetadata {
    pub width: u32,
    pub height: u32,
    /// None when neither the container nor the stream reports a duration
    pub duration_secs: Option<f64>,
    pub has_video_stream: bool,
    pub frame_rate: Option<f64>,
    pub codec_name: Option<String>,
    /// Container, e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: Option<String>,
    /// Overall bitrate in bits per second
    pub bit_rate: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub has_audio_stream: bool,
}

impl ProbedMetadata {
    /// Metadata for a file without a usable video stream
    pub fn no_video(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs,
            ..Default::default()
        }
    }

    /// File size in human-readable form, e.g. "12.4 MB"
    pub fn size_display(&self) -> Option<String> {
        self.file_size_bytes
            .map(|bytes| humansize::format_size(bytes, humansize::DECIMAL))
    }
}

impl FFProbeData {
    pub fn video_stream(&self) -> Option<&FFProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    pub fn has_audio_stream(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"))
    }

    /// Reduce raw ffprobe output to [`ProbedMetadata`]
    pub fn to_metadata(&self) -> ProbedMetadata {
        let video = self.video_stream();
        let format = self.format.as_ref();

        let duration_secs = format
            .and_then(|f| f.duration.as_deref())
            .or_else(|| video.and_then(|v| v.duration.as_deref()))
            .and_then(parse_duration);

        let container = ProbedMetadata {
            duration_secs,
            format_name: format.and_then(|f| f.format_name.clone()),
            bit_rate: format.and_then(|f| f.bit_rate.as_deref()).and_then(parse_count),
            file_size_bytes: format.and_then(|f| f.size.as_deref()).and_then(parse_count),
            has_audio_stream: self.has_audio_stream(),
            ..Default::default()
        };

        let video = match video {
            Some(v) => v,
            None => return container,
        };

        // A video stream without dimensions cannot be decoded meaningfully
        let (width, height) = match (video.width, video.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => return container,
        };

        let frame_rate = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));

        ProbedMetadata {
            width,
            height,
            has_video_stream: true,
            frame_rate,
            codec_name: video.codec_name.clone(),
            ..container
        }
    }
}

fn parse_count(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Parse frame rate from string (e.g., "30/1", "30000/1001", "29.97")
pub fn parse_frame_rate(frame_rate_str: &str) -> Option<f64> {
    if let Some((num, den)) = frame_rate_str.split_once('/') {
        let num = num.trim().parse::<f64>().ok()?;
        let den = den.trim().parse::<f64>().ok()?;
        if den != 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }

    frame_rate_str
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|&f| f > 0.0 && f < 1000.0)
}

/// Boundary to whatever can tell us about an input file
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbedMetadata>;
}

/// [`MetadataProbe`] backed by the ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(cfg: &EnhanceConfig) -> Self {
        Self {
            ffprobe_bin: cfg.ffprobe_bin.clone(),
        }
    }

    /// Run ffprobe and parse its JSON output
    pub async fn probe_raw(&self, file_path: &Path) -> Result<FFProbeData> {
        // Verify file exists before trying to probe
        if !file_path.exists() {
            return Err(anyhow!("File does not exist: {}", file_path.display()));
        }

        debug!("Executing ffprobe for: {}", file_path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(file_path)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute ffprobe for: {}. Ensure ffprobe is installed and accessible at: {}",
                file_path.display(),
                self.ffprobe_bin.display()
            ))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);

            return Err(anyhow!(
                "ffprobe failed (exit code {}) for {}: {}",
                exit_code,
                file_path.display(),
                stderr.trim()
            ));
        }

        let json_str = String::from_utf8(output.stdout)
            .context("ffprobe output is not valid UTF-8")?;

        serde_json::from_str(&json_str)
            .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))
    }
}

#[async_trait]
impl MetadataProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<ProbedMetadata> {
        let data = self.probe_raw(path).await?;
        let meta = data.to_metadata();
        info!(
            "Input video: {}x{}, duration: {}",
            meta.width,
            meta.height,
            meta.duration_secs
                .map(|d| format!("{:.2}s", d))
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(meta)
    }
}
