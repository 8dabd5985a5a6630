use serde::Serialize;
use crate::request::OutputQuality;

/// Encoder parameters for one output quality level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingParams {
    /// x264 speed preset
    pub preset: &'static str,
    /// Constant rate factor, lower is higher fidelity
    pub crf: u8,
    /// Bitrate ceiling passed to `-maxrate`
    pub max_bitrate: &'static str,
    /// VBV buffer passed to `-bufsize`
    pub buffer_size: &'static str,
}

impl EncodingParams {
    /// Fixed quality table
    pub fn for_quality(quality: OutputQuality) -> Self {
        match quality {
            OutputQuality::Draft => EncodingParams {
                preset: "fast",
                crf: 25,
                max_bitrate: "5M",
                buffer_size: "10M",
            },
            OutputQuality::High => EncodingParams {
                preset: "medium",
                crf: 23,
                max_bitrate: "8M",
                buffer_size: "16M",
            },
            OutputQuality::Ultra => EncodingParams {
                preset: "slow",
                crf: 20,
                max_bitrate: "10M",
                buffer_size: "20M",
            },
            OutputQuality::Lossless => EncodingParams {
                preset: "veryslow",
                crf: 0,
                max_bitrate: "50M",
                buffer_size: "100M",
            },
        }
    }
}
