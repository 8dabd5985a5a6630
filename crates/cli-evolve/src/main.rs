use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use evolve::{
    config::{EnhanceConfig, RequestDefaults},
    ffmpeg_native::CommandBuilder,
    plan::{ExecutionPlan, PlanAdjustment},
    request::default_output_path,
    CancelOutcome, EnhancementMode, FFmpegManager, FfmpegEngine, FfprobeProbe, JobController, JobEvent,
    MetadataProbe, OutputQuality, PreparedJob, ProcessingRequest,
};
use log::{debug, info, warn};
use serde_json::json;

/// Upscale and enhance videos with ffmpeg
#[derive(Parser, Debug)]
#[command(name = "frame-evolve", author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enhance a video
    Enhance {
        input: PathBuf,
        #[command(flatten)]
        options: RequestArgs,
        /// Emit events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show what ffprobe reports for a file
    Probe {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the plan, filter graph and ffmpeg command without running
    Plan {
        input: PathBuf,
        #[command(flatten)]
        options: RequestArgs,
        #[arg(long)]
        json: bool,
    },
    /// Check that ffmpeg is installed
    Check,
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// Output file (default: <input>_enhanced.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Scale factor, 1 or more
    #[arg(short, long)]
    scale: Option<f64>,

    /// standard, sharp, smooth or anime
    #[arg(short, long)]
    mode: Option<EnhancementMode>,

    /// Noise reduction strength, 0-100
    #[arg(short, long)]
    noise: Option<u8>,

    /// draft, high, ultra or lossless
    #[arg(short, long)]
    quality: Option<OutputQuality>,
}

impl RequestArgs {
    fn into_request(self, input: PathBuf, defaults: &RequestDefaults) -> ProcessingRequest {
        let output_path = self.output.unwrap_or_else(|| default_output_path(&input));
        ProcessingRequest {
            input_path: input,
            output_path,
            scale_factor: self.scale.unwrap_or(defaults.scale_factor),
            enhancement_mode: self.mode.unwrap_or(defaults.enhancement_mode),
            noise_reduction: self.noise.unwrap_or(defaults.noise_reduction),
            output_quality: self.quality.unwrap_or(defaults.output_quality),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins unless --verbose is given
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.format_timestamp_secs().init();

    let cfg = EnhanceConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    debug!("Configuration: {:?}", cfg);

    match args.command {
        Command::Enhance { input, options, json } => {
            let request = options.into_request(input, &cfg.defaults);
            run_enhance(&cfg, request, json).await
        }
        Command::Probe { input, json } => run_probe(&cfg, input, json).await,
        Command::Plan { input, options, json } => {
            let request = options.into_request(input, &cfg.defaults);
            run_plan(&cfg, request, json).await
        }
        Command::Check => {
            let version = FFmpegManager::check(&cfg).await?;
            println!("ffmpeg {} found at {}", version, cfg.ffmpeg_bin.display());
            Ok(())
        }
    }
}

fn controller(cfg: &EnhanceConfig) -> JobController {
    JobController::new(cfg, Arc::new(FfprobeProbe::new(cfg)), Arc::new(FfmpegEngine::new(cfg)))
}

async fn run_enhance(cfg: &EnhanceConfig, request: ProcessingRequest, json: bool) -> Result<()> {
    let controller = Arc::new(controller(cfg));

    let input = request.input_path.clone();
    let mut handle = controller
        .submit(request)
        .await
        .with_context(|| format!("Failed to start enhancement of {}", input.display()))?;

    if json {
        emit(json!({ "event": "started", "job_id": handle.id, "plan": handle.plan, "pipeline": handle.pipeline }));
    } else {
        print_plan(&handle.plan);
        if let Some(graph) = handle.pipeline.filter_graph() {
            println!("Filters: {}", graph);
        }
    }

    let cancel_ctl = controller.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling job");
            match cancel_ctl.cancel().await {
                CancelOutcome::ForceKilled => warn!("ffmpeg did not stop in time and was killed"),
                outcome => info!("Cancel: {:?}", outcome),
            }
        }
    });

    let outcome = loop {
        let Some(event) = handle.next_event().await else {
            break Err(anyhow!("Job {} ended without a result", handle.id));
        };
        match event {
            JobEvent::Progress(sample) => {
                if json {
                    emit(json!({ "event": "progress", "sample": sample }));
                } else {
                    eprint!(
                        "\r{:>3}%  {}  {:.1} fps  {:.2}x   ",
                        sample.percent,
                        sample.timemark(),
                        sample.current_fps,
                        sample.speed_multiplier
                    );
                }
            }
            JobEvent::Completed(result) => {
                if json {
                    emit(json!({ "event": "completed", "result": result }));
                } else {
                    eprintln!();
                    println!("Saved {} ({})", result.output_path.display(), result.size_display());
                }
                break Ok(());
            }
            JobEvent::Failed(err) => {
                if json {
                    emit(json!({ "event": "failed", "kind": err.kind(), "message": err.to_string() }));
                } else {
                    eprintln!();
                }
                break Err(anyhow::Error::new(err));
            }
            JobEvent::Cancelled => {
                if json {
                    emit(json!({ "event": "cancelled" }));
                } else {
                    eprintln!();
                }
                break Err(anyhow!("Processing was cancelled"));
            }
        }
    };

    interrupt.abort();
    outcome
}

async fn run_probe(cfg: &EnhanceConfig, input: PathBuf, json: bool) -> Result<()> {
    let metadata = FfprobeProbe::new(cfg).probe(&input).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    if !metadata.has_video_stream {
        bail!("{} has no video stream", input.display());
    }
    println!("{}", input.display());
    println!("  Resolution: {}x{}", metadata.width, metadata.height);
    match metadata.duration_secs {
        Some(d) => println!("  Duration:   {:.2}s", d),
        None => println!("  Duration:   unknown"),
    }
    if let Some(codec) = &metadata.codec_name {
        println!("  Codec:      {}", codec);
    }
    if let Some(fps) = metadata.frame_rate {
        println!("  Frame rate: {:.3}", fps);
    }
    if let Some(format) = &metadata.format_name {
        println!("  Container:  {}", format);
    }
    if let Some(bit_rate) = metadata.bit_rate {
        println!("  Bitrate:    {} kb/s", bit_rate / 1000);
    }
    if let Some(size) = metadata.size_display() {
        println!("  Size:       {}", size);
    }
    println!("  Audio:      {}", if metadata.has_audio_stream { "yes" } else { "no" });
    Ok(())
}

async fn run_plan(cfg: &EnhanceConfig, request: ProcessingRequest, json: bool) -> Result<()> {
    let PreparedJob { plan, pipeline, invocation } = controller(cfg)
        .prepare(&request)
        .await
        .with_context(|| format!("Failed to plan {}", request.input_path.display()))?;
    let ffmpeg_args = CommandBuilder::new().build_enhance_command(&invocation);

    if json {
        let out = json!({
            "plan": plan,
            "adjustments": plan.adjustments(),
            "pipeline": pipeline,
            "encoding": invocation.params,
            "ffmpeg_args": ffmpeg_args,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_plan(&plan);
    println!("Filters: {}", pipeline.filter_graph().unwrap_or_else(|| "(none)".to_string()));
    println!("Command: {} {}", cfg.ffmpeg_bin.display(), ffmpeg_args.join(" "));
    Ok(())
}

fn print_plan(plan: &ExecutionPlan) {
    println!(
        "Plan: {}x{} -> {}x{} (scale {}, quality {})",
        plan.input_width,
        plan.input_height,
        plan.output_width,
        plan.output_height,
        plan.effective_scale_factor,
        plan.effective_quality
    );
    for adjustment in plan.adjustments() {
        match adjustment {
            PlanAdjustment::ScaleReduced { requested, effective } => {
                println!("  Scale reduced from {} to {} to stay within 4K", requested, effective)
            }
            PlanAdjustment::QualityDowngraded { requested, effective } => {
                println!("  Quality lowered from {} to {} for a long video", requested, effective)
            }
        }
    }
}

fn emit(value: serde_json::Value) {
    println!("{}", value);
}
