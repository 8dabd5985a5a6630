//! Plan optimizer: turns a raw request plus probed metadata into a bounded
//! execution plan.
//!
//! Output resolution is capped at 4K UHD. When the requested scale factor
//! would exceed the cap it is reduced to the largest admissible factor,
//! truncated to one decimal so that it can never round back over the limit.
//! Long inputs scaled more than 2x are forced down to `high` quality to keep
//! the encode time reasonable.

use log::{info, warn};
use serde::Serialize;
use crate::error::ProcessingError;
use crate::ffprobe::ProbedMetadata;
use crate::request::{OutputQuality, ProcessingRequest};

pub const MAX_WIDTH: u32 = 3840;
pub const MAX_HEIGHT: u32 = 2160;
pub const MAX_PIXELS: u64 = 8_294_400;

/// Inputs longer than this are considered long for the quality rule
pub const LONG_INPUT_SECS: f64 = 60.0;
/// Scale factors above this trigger the quality rule on long inputs
pub const QUALITY_DOWNGRADE_SCALE: f64 = 2.0;

/// A change the optimizer made to what the user asked for
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanAdjustment {
    ScaleReduced { requested: f64, effective: f64 },
    QualityDowngraded { requested: OutputQuality, effective: OutputQuality },
}

/// The resolved parameters actually executed for a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub requested_scale_factor: f64,
    pub effective_scale_factor: f64,
    pub requested_quality: OutputQuality,
    pub effective_quality: OutputQuality,
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub duration_secs: Option<f64>,
}

impl ExecutionPlan {
    /// Differences between the request and the plan, in a fixed order
    pub fn adjustments(&self) -> Vec<PlanAdjustment> {
        let mut adjustments = Vec::new();
        if self.effective_scale_factor != self.requested_scale_factor {
            adjustments.push(PlanAdjustment::ScaleReduced {
                requested: self.requested_scale_factor,
                effective: self.effective_scale_factor,
            });
        }
        if self.effective_quality != self.requested_quality {
            adjustments.push(PlanAdjustment::QualityDowngraded {
                requested: self.requested_quality,
                effective: self.effective_quality,
            });
        }
        adjustments
    }

    pub fn is_adjusted(&self) -> bool {
        !self.adjustments().is_empty()
    }

    pub fn output_pixels(&self) -> u64 {
        self.output_width as u64 * self.output_height as u64
    }
}

fn exceeds_caps(width: f64, height: f64) -> bool {
    width > MAX_WIDTH as f64 || height > MAX_HEIGHT as f64 || width * height > MAX_PIXELS as f64
}

/// Largest factor within all three caps, floored at 1 and truncated to one decimal
fn admissible_scale_factor(input_width: u32, input_height: u32, requested: f64) -> f64 {
    let w = input_width as f64;
    let h = input_height as f64;

    let width_ratio = MAX_WIDTH as f64 / w;
    let height_ratio = MAX_HEIGHT as f64 / h;
    let pixel_ratio = (MAX_PIXELS as f64 / (w * h)).sqrt();

    let factor = width_ratio.min(height_ratio).min(pixel_ratio).min(requested);

    // The epsilon absorbs float error on exact ratios such as 3840/1920
    let truncated = ((factor * 10.0) + 1e-9).floor() / 10.0;
    truncated.max(1.0)
}

/// Derive a bounded execution plan for `request` on an input described by `metadata`
pub fn optimize(request: &ProcessingRequest, metadata: &ProbedMetadata) -> Result<ExecutionPlan, ProcessingError> {
    if !metadata.has_video_stream || metadata.width == 0 || metadata.height == 0 {
        return Err(ProcessingError::InvalidInput(
            "No video stream found in input file".to_string(),
        ));
    }

    let input_width = metadata.width;
    let input_height = metadata.height;

    if exceeds_caps(input_width as f64, input_height as f64) {
        return Err(ProcessingError::InvalidInput(format!(
            "input resolution {}x{} already exceeds the {}x{} output limit",
            input_width, input_height, MAX_WIDTH, MAX_HEIGHT
        )));
    }

    let requested = request.scale_factor;
    let naive_width = input_width as f64 * requested;
    let naive_height = input_height as f64 * requested;

    let effective_scale_factor = if exceeds_caps(naive_width, naive_height) {
        let factor = admissible_scale_factor(input_width, input_height, requested);
        warn!(
            "Reduced scale factor from {}x to {}x to prevent system overload (target {}x{} -> {}x{})",
            requested,
            factor,
            naive_width.round(),
            naive_height.round(),
            (input_width as f64 * factor).round(),
            (input_height as f64 * factor).round()
        );
        factor
    } else {
        requested
    };

    let is_long = metadata.duration_secs.map_or(false, |d| d > LONG_INPUT_SECS);
    let effective_quality = if is_long && effective_scale_factor > QUALITY_DOWNGRADE_SCALE {
        if request.output_quality != OutputQuality::High {
            warn!(
                "Adjusted quality from \"{}\" to \"high\" for long video to improve processing speed",
                request.output_quality
            );
        }
        OutputQuality::High
    } else {
        request.output_quality
    };

    let output_width = (input_width as f64 * effective_scale_factor).round() as u32;
    let output_height = (input_height as f64 * effective_scale_factor).round() as u32;

    info!(
        "Plan: {}x{} -> {}x{} (scale {}x, quality {})",
        input_width, input_height, output_width, output_height, effective_scale_factor, effective_quality
    );

    Ok(ExecutionPlan {
        requested_scale_factor: requested,
        effective_scale_factor,
        requested_quality: request.output_quality,
        effective_quality,
        input_width,
        input_height,
        output_width,
        output_height,
        duration_secs: metadata.duration_secs,
    })
}
