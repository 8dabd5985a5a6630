use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use crate::config::EnhanceConfig;
use crate::engine::{Engine, EngineControl, EngineEvent, EngineExit, EngineInvocation, EngineRun, EngineSignal};
use crate::error::ProcessingError;
use crate::progress::ProgressParser;

/// Lines of ffmpeg stderr kept for failure classification
const STDERR_TAIL_LINES: usize = 50;

const INSTALL_HINTS: &str = "Please install FFmpeg:\n  \
    Ubuntu/Debian: sudo apt install ffmpeg\n  \
    macOS: brew install ffmpeg\n  \
    Windows: Download from https://ffmpeg.org/download.html";

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> Result<Self> {
        // N.N or N.N.N, optionally with a distro suffix; git builds use an "n" prefix
        let version_part = version_str
            .split_whitespace()
            .map(|s| s.strip_prefix('n').unwrap_or(s))
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let numeric: String = version_part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());

        let major = parts
            .next()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?
            .parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", version_part))?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

impl std::fmt::Display for FFmpegVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Availability check for the ffmpeg binary
pub struct FFmpegManager;

impl FFmpegManager {
    /// Run `ffmpeg -version` with a timeout and report the installed version
    pub async fn check(config: &EnhanceConfig) -> Result<FFmpegVersion> {
        let ffmpeg_bin = &config.ffmpeg_bin;
        let limit = Duration::from_secs(config.engine_check_timeout_secs);

        let output = Command::new(ffmpeg_bin)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(limit, output).await {
            Ok(result) => result.with_context(|| {
                format!("FFmpeg not found at: {}\n{}", ffmpeg_bin.display(), INSTALL_HINTS)
            })?,
            Err(_) => {
                return Err(anyhow!(
                    "FFmpeg check timed out after {} seconds ({})",
                    limit.as_secs(),
                    ffmpeg_bin.display()
                ))
            }
        };

        if !output.status.success() {
            return Err(anyhow!(
                "FFmpeg installation issue: `{} -version` exited with {}",
                ffmpeg_bin.display(),
                output.status
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;

        let version = FFmpegVersion::parse(first_line)?;
        info!("FFmpeg {} is installed and ready", version);
        Ok(version)
    }
}

/// Command builder for generating FFmpeg command lines
#[derive(Debug, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Build the full enhancement command.
    ///
    /// Progress is requested as `key=value` blocks on stdout; the usual stats
    /// line on stderr is suppressed so stderr only carries diagnostics.
    pub fn build_enhance_command(&self, invocation: &EngineInvocation) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            invocation.input.to_string_lossy().to_string(),
        ];

        if let Some(graph) = invocation.pipeline.filter_graph() {
            args.push("-vf".to_string());
            args.push(graph);
        }

        let params = &invocation.params;
        args.extend([
            "-c:v".to_string(),
            invocation.video_codec.clone(),
            "-preset".to_string(),
            params.preset.to_string(),
            "-crf".to_string(),
            params.crf.to_string(),
            "-maxrate".to_string(),
            params.max_bitrate.to_string(),
            "-bufsize".to_string(),
            params.buffer_size.to_string(),
            // Use all available CPU threads
            "-threads".to_string(),
            "0".to_string(),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
        ]);

        args.push(invocation.output.to_string_lossy().to_string());
        args
    }
}

/// [`Engine`] that spawns the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_bin: PathBuf,
}

impl FfmpegEngine {
    pub fn new(config: &EnhanceConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
        }
    }
}

impl Engine for FfmpegEngine {
    fn start(&self, invocation: EngineInvocation) -> Result<EngineRun, ProcessingError> {
        let args = CommandBuilder::new().build_enhance_command(&invocation);
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProcessingError::EngineStartFailed(format!("{}: {}", self.ffmpeg_bin.display(), e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessingError::EngineStartFailed("failed to capture ffmpeg stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessingError::EngineStartFailed("failed to capture ffmpeg stderr".to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let progress_tx = event_tx.clone();
        let duration = invocation.duration_secs;
        let progress_task = tokio::spawn(async move {
            let mut parser = ProgressParser::new(duration);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(progress) = parser.feed_line(&line) {
                    let _ = progress_tx.send(EngineEvent::Progress(progress));
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!("ffmpeg: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        });

        tokio::spawn(async move {
            let exit = supervise(child, signal_rx).await;
            // Deliver remaining progress before the exit event
            let _ = progress_task.await;
            let stderr_tail = stderr_task.await.unwrap_or_default();
            let exit = EngineExit {
                stderr_tail: if exit.stderr_tail.is_empty() { stderr_tail } else { exit.stderr_tail },
                ..exit
            };
            debug!("FFmpeg exited: code={:?} signal={:?}", exit.code, exit.signal);
            let _ = event_tx.send(EngineEvent::Exited(exit));
        });

        Ok(EngineRun {
            events: event_rx,
            control: EngineControl::new(signal_tx),
        })
    }
}

/// Wait for the child while relaying termination signals to it
async fn supervise(mut child: Child, mut signals: mpsc::UnboundedReceiver<EngineSignal>) -> EngineExit {
    let mut signals_open = true;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            signal = signals.recv(), if signals_open => match signal {
                Some(EngineSignal::Terminate) => terminate(&mut child),
                Some(EngineSignal::Kill) => {
                    if let Err(e) = child.start_kill() {
                        debug!("Failed to kill ffmpeg: {}", e);
                    }
                }
                None => signals_open = false,
            },
        }
    };

    match status {
        Ok(status) => EngineExit {
            code: status.code(),
            signal: exit_signal(&status),
            stderr_tail: String::new(),
        },
        Err(e) => EngineExit {
            code: None,
            signal: None,
            stderr_tail: format!("Failed to wait for FFmpeg process: {}", e),
        },
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // id() is None once the child has been reaped
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to ffmpeg ({}) failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to stop ffmpeg: {}", e);
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
