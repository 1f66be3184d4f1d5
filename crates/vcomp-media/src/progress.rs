//! FFmpeg progress parsing.
//!
//! FFmpeg reports progress in two shapes on stderr:
//! - `-progress pipe:2` emits one `key=value` per line, with a block
//!   terminated by `progress=continue` or `progress=end`
//! - the classic stats line (`frame=  120 fps=30 ... time=00:00:04.00 ...
//!   speed=1.2x`) packs many pairs onto one line
//!
//! Both are folded into the same [`FfmpegProgress`] snapshot.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default minimum wall time between two emitted progress events.
pub const DEFAULT_PROGRESS_THROTTLE: Duration = Duration::from_millis(500);

/// Keys emitted by `-progress`; lines with these keys are not diagnostics.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in microseconds
    pub out_time_us: i64,
    /// Output time as reported (HH:MM:SS.micro)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Output time in seconds.
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_us.max(0) as f64 / 1_000_000.0
    }

    /// Calculate progress percentage given the total expected duration in seconds.
    pub fn percentage(&self, total_duration_secs: f64) -> f64 {
        if total_duration_secs <= 0.0 {
            return if self.is_complete { 100.0 } else { 0.0 };
        }
        ((self.out_time_secs() / total_duration_secs) * 100.0).clamp(0.0, 100.0)
    }

    /// Estimate time remaining in seconds.
    pub fn eta_seconds(&self, total_duration_secs: f64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_us <= 0 {
            return None;
        }

        let remaining = total_duration_secs - self.out_time_secs();
        if remaining <= 0.0 {
            return Some(0.0);
        }

        // Time remaining = remaining duration / speed
        Some(remaining / self.speed)
    }
}

/// Discrete progress event yielded to the caller while rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProgress {
    /// 0-100, never decreasing within one render
    pub percent: f64,
    /// Seconds of output written so far
    pub out_time_secs: f64,
    /// Encoding speed relative to realtime
    pub speed: f64,
    /// Estimated seconds remaining
    pub eta_secs: Option<f64>,
    /// Set on the final event of a successful render
    pub is_complete: bool,
}

/// Parse `HH:MM:SS.frac` (or `MM:SS.frac` / bare seconds) into seconds.
///
/// Negative and `N/A` values yield `None`.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') || value.eq_ignore_ascii_case("N/A") {
        return None;
    }

    let mut seconds = 0.0;
    for part in value.split(':') {
        let n: f64 = part.parse().ok()?;
        if !n.is_finite() || n < 0.0 {
            return None;
        }
        seconds = seconds * 60.0 + n;
    }
    Some(seconds)
}

fn parse_speed(value: &str) -> Option<f64> {
    // Format: "1.5x" or "N/A"
    value.trim().strip_suffix('x')?.trim().parse().ok()
}

/// Whether a stderr line carries progress rather than diagnostics.
pub fn is_progress_line(line: &str) -> bool {
    let line = line.trim();
    if is_stats_line(line) {
        return true;
    }
    match line.split_once('=') {
        Some((key, _)) => PROGRESS_KEYS.contains(&key.trim()),
        None => false,
    }
}

fn is_stats_line(line: &str) -> bool {
    line.matches('=').count() > 1 && line.contains("time=")
}

/// Parse the classic stats line (`frame=  12 fps=0.0 ... time=00:00:00.40 ... speed=0.8x`).
fn parse_stats_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    // FFmpeg pads values after '=' with spaces; glue them back to their key
    let mut normalized = String::with_capacity(line.len());
    let mut after_eq = false;
    for ch in line.chars() {
        if after_eq && ch == ' ' {
            continue;
        }
        after_eq = ch == '=';
        normalized.push(ch);
    }

    let mut saw_time = false;
    for token in normalized.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "time" => {
                if let Some(secs) = parse_timestamp(value) {
                    current.out_time_us = (secs * 1_000_000.0).round() as i64;
                    current.out_time = value.to_string();
                    saw_time = true;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                if let Some(speed) = parse_speed(value) {
                    current.speed = speed;
                }
            }
            _ => {}
        }
    }

    saw_time.then(|| current.clone())
}

/// Parse one stderr line, updating `current`.
///
/// Returns a snapshot when the line completes a progress report: the end of
/// a `-progress` block, or a stats line with a usable `time=`.
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if is_stats_line(line) {
        return parse_stats_line(line, current);
    }

    if let Some((key, value)) = line.split_once('=') {
        let value = value.trim();
        match key.trim() {
            "out_time_us" | "out_time_ms" => {
                // Both are microseconds; `out_time_ms` is misnamed upstream
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        current.out_time_us = us;
                    }
                }
            }
            "out_time" | "time" => {
                if let Some(secs) = parse_timestamp(value) {
                    current.out_time_us = (secs * 1_000_000.0).round() as i64;
                    current.out_time = value.to_string();
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                if let Some(speed) = parse_speed(value) {
                    current.speed = speed;
                }
            }
            "progress" => {
                // "continue" or "end"
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Rate limiter that also keeps emitted percentages monotonic.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: f64,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_percent: 0.0,
        }
    }

    /// Decide whether to emit `percent` observed at `now`.
    ///
    /// The first and final observations always pass. Returns the value to
    /// emit, never lower than a previously emitted one.
    pub fn observe(&mut self, now: Instant, percent: f64, is_final: bool) -> Option<f64> {
        let percent = percent.clamp(0.0, 100.0).max(self.last_percent);
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };

        if !(due || is_final) {
            return None;
        }
        if self.last_emit.is_some() && !is_final && percent <= self.last_percent {
            // Nothing new to say
            return None;
        }

        self.last_emit = Some(now);
        self.last_percent = percent;
        Some(percent)
    }

    pub fn last_percent(&self) -> f64 {
        self.last_percent
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_THROTTLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let progress = FfmpegProgress {
            out_time_us: 5_000_000,
            ..Default::default()
        };

        assert!((progress.percentage(10.0) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5.0) - 100.0).abs() < 0.01);
        assert!((progress.percentage(2.0) - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_eta_calculation() {
        let progress = FfmpegProgress {
            out_time_us: 5_000_000,
            speed: 2.0, // 2x realtime
            ..Default::default()
        };

        // 5 seconds remaining at 2x speed = 2.5 seconds ETA
        let eta = progress.eta_seconds(10.0).unwrap();
        assert!((eta - 2.5).abs() < 0.01);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:04.50"), Some(4.5));
        assert_eq!(parse_timestamp("01:02:03.25"), Some(3723.25));
        assert_eq!(parse_timestamp("02:03"), Some(123.0));
        assert_eq!(parse_timestamp("7.5"), Some(7.5));
        assert_eq!(parse_timestamp("N/A"), None);
        assert_eq!(parse_timestamp("-577014:32:22.77"), None);
        assert_eq!(parse_timestamp("aa:bb"), None);
    }

    #[test]
    fn test_key_value_block() {
        let mut progress = FfmpegProgress::default();

        assert!(parse_progress_line("frame=120", &mut progress).is_none());
        assert!(parse_progress_line("out_time_us=4000000", &mut progress).is_none());
        assert!(parse_progress_line("out_time=00:00:04.000000", &mut progress).is_none());
        parse_progress_line("speed=1.5x", &mut progress);

        let snapshot = parse_progress_line("progress=continue", &mut progress).unwrap();
        assert_eq!(snapshot.frame, 120);
        assert_eq!(snapshot.out_time_us, 4_000_000);
        assert!((snapshot.speed - 1.5).abs() < 0.01);
        assert!(!snapshot.is_complete);

        let end = parse_progress_line("progress=end", &mut progress).unwrap();
        assert!(end.is_complete);
    }

    #[test]
    fn test_out_time_ms_is_microseconds() {
        let mut progress = FfmpegProgress::default();
        parse_progress_line("out_time_ms=5000000", &mut progress);
        assert_eq!(progress.out_time_us, 5_000_000);
        assert!((progress.out_time_secs() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_line() {
        let mut progress = FfmpegProgress::default();
        let line = "frame=  240 fps= 48 q=28.0 size=    1024kB time=00:00:08.00 bitrate=1048.6kbits/s speed=1.6x";
        let snapshot = parse_progress_line(line, &mut progress).unwrap();
        assert_eq!(snapshot.frame, 240);
        assert_eq!(snapshot.fps, 48.0);
        assert!((snapshot.out_time_secs() - 8.0).abs() < 1e-9);
        assert!((snapshot.speed - 1.6).abs() < 0.01);
    }

    #[test]
    fn test_stats_line_without_time_is_ignored() {
        let mut progress = FfmpegProgress::default();
        let line = "frame=    0 fps=0.0 q=0.0 size=       0kB time=N/A bitrate=N/A speed=N/A";
        assert!(parse_progress_line(line, &mut progress).is_none());
        assert_eq!(progress.out_time_us, 0);
    }

    #[test]
    fn test_is_progress_line() {
        assert!(is_progress_line("out_time=00:00:01.000000"));
        assert!(is_progress_line("progress=end"));
        assert!(is_progress_line("frame=  10 fps=0.0 time=00:00:00.33 speed=0.6x"));
        assert!(!is_progress_line("[h264 @ 0x55] error while decoding MB 3 4"));
        assert!(!is_progress_line("Conversion failed!"));
    }

    #[test]
    fn test_throttle_limits_rate() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_millis(500));

        assert_eq!(throttle.observe(start, 1.0, false), Some(1.0));
        assert_eq!(throttle.observe(start + Duration::from_millis(100), 5.0, false), None);
        assert_eq!(
            throttle.observe(start + Duration::from_millis(600), 10.0, false),
            Some(10.0)
        );
        // Final always passes
        assert_eq!(
            throttle.observe(start + Duration::from_millis(650), 100.0, true),
            Some(100.0)
        );
    }

    #[test]
    fn test_throttle_is_monotonic() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_millis(0));

        assert_eq!(throttle.observe(start, 40.0, false), Some(40.0));
        // A regression is never emitted
        assert_eq!(throttle.observe(start + Duration::from_millis(1), 30.0, false), None);
        assert_eq!(throttle.last_percent(), 40.0);
        assert_eq!(
            throttle.observe(start + Duration::from_millis(2), 30.0, true),
            Some(40.0)
        );
    }
}
