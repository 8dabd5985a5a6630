use serde::Serialize;

/// Progress as reported by the engine, before clamping or de-duplication
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineProgress {
    /// Percent complete, may be out of range or NaN when the engine is confused
    pub percent: f64,
    /// Media time encoded so far, in seconds
    pub elapsed_secs: f64,
    pub fps: f64,
    /// Encode speed as a multiple of realtime
    pub speed: f64,
}

/// Progress sample delivered to the caller
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSample {
    /// 0-100, never decreasing within a job
    pub percent: u8,
    pub elapsed_media_secs: f64,
    pub current_fps: f64,
    pub speed_multiplier: f64,
}

impl ProgressSample {
    /// Elapsed media time as HH:MM:SS
    pub fn timemark(&self) -> String {
        let total = self.elapsed_media_secs.max(0.0) as u64;
        format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}

/// Forwards at most one sample per integer percent
#[derive(Debug, Default)]
pub struct ProgressRelay {
    last_percent: Option<u8>,
}

impl ProgressRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a sample only when the clamped integer percent advanced
    pub fn accept(&mut self, raw: &EngineProgress) -> Option<ProgressSample> {
        let percent = if raw.percent.is_nan() {
            0
        } else {
            raw.percent.round().clamp(0.0, 100.0) as u8
        };

        if self.last_percent.map_or(false, |last| percent <= last) {
            return None;
        }
        self.last_percent = Some(percent);

        Some(ProgressSample {
            percent,
            elapsed_media_secs: raw.elapsed_secs,
            current_fps: raw.fps,
            speed_multiplier: raw.speed,
        })
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }
}

/// Incremental parser for ffmpeg `-progress` output.
///
/// ffmpeg writes blocks of `key=value` lines terminated by
/// `progress=continue` or `progress=end`; one [`EngineProgress`] is produced
/// per block.
#[derive(Debug)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    pending: EngineProgress,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            pending: EngineProgress::default(),
        }
    }

    pub fn feed_line(&mut self, line: &str) -> Option<EngineProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            // out_time_ms is microseconds as well
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.pending.elapsed_secs = us.max(0) as f64 / 1_000_000.0;
                }
            }
            "out_time" => {
                if let Some(secs) = parse_timemark(value) {
                    self.pending.elapsed_secs = secs;
                }
            }
            "fps" => {
                self.pending.fps = value.parse().unwrap_or(0.0);
            }
            "speed" => {
                self.pending.speed = value.trim_end_matches('x').trim().parse().unwrap_or(0.0);
            }
            "progress" => {
                let mut sample = self.pending;
                sample.percent = match (value, self.duration_secs) {
                    ("end", _) => 100.0,
                    (_, Some(duration)) => sample.elapsed_secs / duration * 100.0,
                    (_, None) => 0.0,
                };
                return Some(sample);
            }
            _ => {}
        }
        None
    }
}

/// Parse HH:MM:SS.micro into seconds
pub fn parse_timemark(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(percent: f64) -> EngineProgress {
        EngineProgress { percent, ..Default::default() }
    }

    #[test]
    fn test_relay_suppresses_duplicate_percents() {
        let mut relay = ProgressRelay::new();
        let forwarded: Vec<u8> = [0.0, 0.2, 1.4, 1.6, 2.1, 2.4, 10.0]
            .iter()
            .filter_map(|p| relay.accept(&raw(*p)))
            .map(|s| s.percent)
            .collect();
        assert_eq!(forwarded, vec![0, 1, 2, 10]);
    }

    #[test]
    fn test_relay_clamps_out_of_range_values() {
        let mut relay = ProgressRelay::new();
        assert_eq!(relay.accept(&raw(-5.0)).map(|s| s.percent), Some(0));
        assert_eq!(relay.accept(&raw(140.0)).map(|s| s.percent), Some(100));
        assert_eq!(relay.accept(&raw(100.0)), None);
        assert_eq!(relay.accept(&raw(f64::NAN)), None);
    }

    #[test]
    fn test_relay_never_goes_backwards() {
        let mut relay = ProgressRelay::new();
        assert!(relay.accept(&raw(40.0)).is_some());
        assert!(relay.accept(&raw(35.0)).is_none());
        assert_eq!(relay.last_percent(), Some(40));
    }

    #[test]
    fn test_parser_emits_one_sample_per_block() {
        let block = "frame=120\nfps=24.5\nbitrate= 900.1kbits/s\nout_time_us=5000000\n\
                     out_time=00:00:05.000000\nspeed=1.25x\nprogress=continue\n";
        let mut parser = ProgressParser::new(Some(20.0));
        let samples: Vec<EngineProgress> = block.lines().filter_map(|l| parser.feed_line(l)).collect();

        assert_eq!(samples.len(), 1);
        let s = samples[0];
        assert_eq!(s.elapsed_secs, 5.0);
        assert_eq!(s.fps, 24.5);
        assert_eq!(s.speed, 1.25);
        assert_eq!(s.percent, 25.0);
    }

    #[test]
    fn test_parser_end_block_is_complete() {
        let mut parser = ProgressParser::new(None);
        assert_eq!(parser.feed_line("out_time=00:01:00.000000"), None);
        let sample = parser.feed_line("progress=end").unwrap();
        assert_eq!(sample.percent, 100.0);
        assert_eq!(sample.elapsed_secs, 60.0);
    }

    #[test]
    fn test_parser_tolerates_na_values() {
        let mut parser = ProgressParser::new(Some(10.0));
        parser.feed_line("out_time_us=N/A");
        parser.feed_line("speed=N/A");
        let sample = parser.feed_line("progress=continue").unwrap();
        assert_eq!(sample.speed, 0.0);
        assert_eq!(sample.percent, 0.0);
    }

    #[test]
    fn test_timemark() {
        assert_eq!(parse_timemark("01:02:03.5"), Some(3723.5));
        assert_eq!(parse_timemark("bogus"), None);

        let sample = ProgressSample { percent: 1, elapsed_media_secs: 3723.5, current_fps: 0.0, speed_multiplier: 0.0 };
        assert_eq!(sample.timemark(), "01:02:03");
    }

    proptest! {
        /// Whatever the engine reports, forwarded percents are in range and strictly increasing
        #[test]
        fn test_forwarded_percents_increase(values in proptest::collection::vec(-50.0f64..200.0, 0..200)) {
            let mut relay = ProgressRelay::new();
            let mut previous: Option<u8> = None;
            for v in values {
                if let Some(sample) = relay.accept(&raw(v)) {
                    prop_assert!(sample.percent <= 100);
                    if let Some(p) = previous {
                        prop_assert!(sample.percent > p);
                    }
                    previous = Some(sample.percent);
                }
            }
        }
    }
}
