//! Filter pipeline builder.
//!
//! Stages are always emitted in the order scale, denoise, mode-specific.
//! Scaling first keeps noise from being amplified at the target resolution,
//! and denoising before sharpening keeps the sharpen pass off noise artifacts.

use std::fmt;
use serde::Serialize;
use crate::plan::ExecutionPlan;
use crate::request::EnhancementMode;

/// Denoise strength cap; stronger settings cost too much throughput
pub const MAX_DENOISE_STRENGTH: f64 = 0.8;

/// ffmpeg `scale` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAlgorithm {
    Lanczos,
    Bicubic,
    Spline,
}

impl ScaleAlgorithm {
    pub fn for_mode(mode: EnhancementMode) -> Self {
        match mode {
            EnhancementMode::Sharp => ScaleAlgorithm::Lanczos,
            EnhancementMode::Smooth => ScaleAlgorithm::Bicubic,
            EnhancementMode::Anime => ScaleAlgorithm::Spline,
            EnhancementMode::Standard => ScaleAlgorithm::Bicubic,
        }
    }

    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            ScaleAlgorithm::Lanczos => "lanczos",
            ScaleAlgorithm::Bicubic => "bicubic",
            ScaleAlgorithm::Spline => "spline",
        }
    }
}

/// Unsharp-mask kernel (ffmpeg `unsharp`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SharpenKernel {
    pub luma_size_x: u8,
    pub luma_size_y: u8,
    pub luma_amount: f64,
    pub chroma_size_x: u8,
    pub chroma_size_y: u8,
    pub chroma_amount: f64,
}

impl SharpenKernel {
    /// Visible but safe sharpening for live action
    pub const SHARP: SharpenKernel = SharpenKernel {
        luma_size_x: 3,
        luma_size_y: 3,
        luma_amount: 0.8,
        chroma_size_x: 3,
        chroma_size_y: 3,
        chroma_amount: 0.0,
    };

    /// Lighter kernel for flat-shaded animation
    pub const ANIME: SharpenKernel = SharpenKernel {
        luma_size_x: 2,
        luma_size_y: 2,
        luma_amount: 0.6,
        chroma_size_x: 2,
        chroma_size_y: 2,
        chroma_amount: 0.0,
    };
}

/// One stage of the video filter chain
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterStage {
    Scale {
        width: u32,
        height: u32,
        algorithm: ScaleAlgorithm,
    },
    /// ffmpeg `hqdn3d`
    Denoise {
        luma_spatial: f64,
        chroma_spatial: f64,
        luma_temporal: f64,
        chroma_temporal: f64,
    },
    Sharpen(SharpenKernel),
    /// ffmpeg `avgblur`
    Blur { radius: u32 },
}

impl FilterStage {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FilterStage::Scale { .. } => "scale",
            FilterStage::Denoise { .. } => "denoise",
            FilterStage::Sharpen(_) => "sharpen",
            FilterStage::Blur { .. } => "blur",
        }
    }

    /// Denoise stage for a 0-100 user strength, or None when disabled
    pub fn denoise(noise_reduction: u8) -> Option<Self> {
        if noise_reduction == 0 {
            return None;
        }
        let strength = (noise_reduction as f64 / 100.0).min(MAX_DENOISE_STRENGTH);
        Some(FilterStage::Denoise {
            luma_spatial: strength,
            chroma_spatial: strength,
            luma_temporal: strength * 0.5,
            chroma_temporal: strength * 0.5,
        })
    }
}

impl fmt::Display for FilterStage {
    /// ffmpeg filter syntax
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::Scale { width, height, algorithm } => {
                write!(f, "scale={}:{}:flags={}", width, height, algorithm.ffmpeg_name())
            }
            FilterStage::Denoise { luma_spatial, chroma_spatial, luma_temporal, chroma_temporal } => {
                write!(f, "hqdn3d={}:{}:{}:{}", luma_spatial, chroma_spatial, luma_temporal, chroma_temporal)
            }
            FilterStage::Sharpen(k) => write!(
                f,
                "unsharp={}:{}:{:.1}:{}:{}:{:.1}",
                k.luma_size_x, k.luma_size_y, k.luma_amount, k.chroma_size_x, k.chroma_size_y, k.chroma_amount
            ),
            FilterStage::Blur { radius } => write!(f, "avgblur={}", radius),
        }
    }
}

/// Ordered, immutable filter chain
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Pipeline {
    stages: Vec<FilterStage>,
}

impl Pipeline {
    #[cfg(test)]
    pub(crate) fn from_stages(stages: Vec<FilterStage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Comma-joined ffmpeg `-vf` argument, None when there is nothing to apply
    pub fn filter_graph(&self) -> Option<String> {
        if self.stages.is_empty() {
            return None;
        }
        Some(
            self.stages
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Build the filter chain for a plan
pub fn build(plan: &ExecutionPlan, mode: EnhancementMode, noise_reduction: u8) -> Pipeline {
    let mut stages = Vec::with_capacity(3);

    // Explicit dimensions rather than a multiplier so output size is exact
    if plan.effective_scale_factor > 1.0 {
        stages.push(FilterStage::Scale {
            width: plan.output_width,
            height: plan.output_height,
            algorithm: ScaleAlgorithm::for_mode(mode),
        });
    }

    if let Some(denoise) = FilterStage::denoise(noise_reduction) {
        stages.push(denoise);
    }

    match mode {
        EnhancementMode::Sharp => stages.push(FilterStage::Sharpen(SharpenKernel::SHARP)),
        EnhancementMode::Smooth => stages.push(FilterStage::Blur { radius: 1 }),
        EnhancementMode::Anime => stages.push(FilterStage::Sharpen(SharpenKernel::ANIME)),
        EnhancementMode::Standard => {}
    }

    log::debug!("Built pipeline with {} stage(s)", stages.len());
    Pipeline { stages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::request::OutputQuality;

    fn plan(scale: f64, width: u32, height: u32) -> ExecutionPlan {
        ExecutionPlan {
            requested_scale_factor: scale,
            effective_scale_factor: scale,
            requested_quality: OutputQuality::High,
            effective_quality: OutputQuality::High,
            input_width: (width as f64 / scale).round() as u32,
            input_height: (height as f64 / scale).round() as u32,
            output_width: width,
            output_height: height,
            duration_secs: Some(10.0),
        }
    }

    fn mode_strategy() -> impl Strategy<Value = EnhancementMode> {
        prop_oneof![
            Just(EnhancementMode::Standard),
            Just(EnhancementMode::Sharp),
            Just(EnhancementMode::Smooth),
            Just(EnhancementMode::Anime),
        ]
    }

    #[test]
    fn test_sharp_720p_doubling() {
        let pipeline = build(&plan(2.0, 2560, 1440), EnhancementMode::Sharp, 50);

        assert_eq!(
            pipeline.stages(),
            &[
                FilterStage::Scale { width: 2560, height: 1440, algorithm: ScaleAlgorithm::Lanczos },
                FilterStage::Denoise {
                    luma_spatial: 0.5,
                    chroma_spatial: 0.5,
                    luma_temporal: 0.25,
                    chroma_temporal: 0.25,
                },
                FilterStage::Sharpen(SharpenKernel::SHARP),
            ]
        );
        assert_eq!(
            pipeline.filter_graph().unwrap(),
            "scale=2560:1440:flags=lanczos,hqdn3d=0.5:0.5:0.25:0.25,unsharp=3:3:0.8:3:3:0.0"
        );
    }

    #[test]
    fn test_scale_algorithm_per_mode() {
        assert_eq!(ScaleAlgorithm::for_mode(EnhancementMode::Sharp), ScaleAlgorithm::Lanczos);
        assert_eq!(ScaleAlgorithm::for_mode(EnhancementMode::Smooth), ScaleAlgorithm::Bicubic);
        assert_eq!(ScaleAlgorithm::for_mode(EnhancementMode::Anime), ScaleAlgorithm::Spline);
        assert_eq!(ScaleAlgorithm::for_mode(EnhancementMode::Standard), ScaleAlgorithm::Bicubic);
    }

    #[test]
    fn test_no_scale_stage_at_unit_factor() {
        let pipeline = build(&plan(1.0, 1280, 720), EnhancementMode::Smooth, 0);
        assert_eq!(pipeline.stages(), &[FilterStage::Blur { radius: 1 }]);
        assert_eq!(pipeline.filter_graph().unwrap(), "avgblur=1");
    }

    #[test]
    fn test_standard_without_noise_reduction_is_empty() {
        let pipeline = build(&plan(1.0, 1280, 720), EnhancementMode::Standard, 0);
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.filter_graph(), None);
    }

    #[test]
    fn test_denoise_strength_is_capped() {
        let pipeline = build(&plan(1.0, 640, 360), EnhancementMode::Standard, 100);
        assert_eq!(pipeline.filter_graph().unwrap(), "hqdn3d=0.8:0.8:0.4:0.4");
    }

    #[test]
    fn test_anime_uses_lighter_kernel() {
        let pipeline = build(&plan(1.5, 1920, 1080), EnhancementMode::Anime, 0);
        assert_eq!(
            pipeline.filter_graph().unwrap(),
            "scale=1920:1080:flags=spline,unsharp=2:2:0.6:2:2:0.0"
        );
        assert!(SharpenKernel::ANIME.luma_amount < SharpenKernel::SHARP.luma_amount);
    }

    proptest! {
        /// Scale always leads and denoise never comes after the mode stage
        #[test]
        fn test_stage_order_is_fixed(
            scale in 1.0f64..4.0,
            noise in 0u8..=100,
            mode in mode_strategy(),
        ) {
            let p = plan(scale, 1920, 1080);
            let pipeline = build(&p, mode, noise);
            let kinds: Vec<&str> = pipeline.stages().iter().map(|s| s.kind_name()).collect();

            if scale > 1.0 {
                prop_assert_eq!(kinds.first().copied(), Some("scale"));
            } else {
                prop_assert!(!kinds.contains(&"scale"));
            }

            let position = |name: &str| kinds.iter().position(|k| *k == name);
            if let (Some(scale_pos), Some(denoise_pos)) = (position("scale"), position("denoise")) {
                prop_assert!(scale_pos < denoise_pos);
            }
            if let Some(denoise_pos) = position("denoise") {
                for later in ["sharpen", "blur"] {
                    if let Some(pos) = position(later) {
                        prop_assert!(denoise_pos < pos);
                    }
                }
            }
            prop_assert_eq!(position("denoise").is_some(), noise > 0);
            prop_assert!(pipeline.len() <= 3);
        }

        /// Building twice gives the same pipeline
        #[test]
        fn test_build_is_pure(noise in 0u8..=100, mode in mode_strategy()) {
            let p = plan(2.0, 2560, 1440);
            prop_assert_eq!(build(&p, mode, noise), build(&p, mode, noise));
        }
    }
}
