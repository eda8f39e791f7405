//! Parsing of FFmpeg's `-progress` key/value stream.

/// Turns FFmpeg output lines into completion fractions.
///
/// The total duration comes from the `Duration:` line FFmpeg logs for its
/// input on stderr. Position comes from `out_time_us` / `out_time_ms` /
/// `out_time` on the `-progress pipe:1` stream.
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    duration_us: Option<u64>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration_us(duration_us: u64) -> Self {
        Self {
            duration_us: (duration_us > 0).then_some(duration_us),
        }
    }

    pub fn duration_us(&self) -> Option<u64> {
        self.duration_us
    }

    /// Look for the input duration in a stderr line. Returns it when found.
    pub fn feed_log_line(&mut self, line: &str) -> Option<u64> {
        let rest = line.trim_start().strip_prefix("Duration:")?;
        let stamp = rest.split(',').next()?.trim();
        let us = parse_timestamp_us(stamp)?;
        if us == 0 {
            return None;
        }
        self.duration_us = Some(us);
        Some(us)
    }

    /// Fraction complete for one `key=value` line of the progress stream.
    pub fn feed_progress_line(&self, line: &str) -> Option<f32> {
        let (key, value) = line.trim().split_once('=')?;
        let position_us = match key {
            "progress" if value == "end" => return Some(1.0),
            // FFmpeg reports `out_time_ms` in microseconds as well.
            "out_time_us" | "out_time_ms" => value.parse::<u64>().ok()?,
            "out_time" => parse_timestamp_us(value)?,
            _ => return None,
        };
        let total = self.duration_us?;
        Some((position_us as f64 / total as f64).clamp(0.0, 1.0) as f32)
    }
}

/// `HH:MM:SS(.frac)` to microseconds.
pub fn parse_timestamp_us(stamp: &str) -> Option<u64> {
    let mut parts = stamp.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = hours * 3600 + minutes * 60;
    Some(whole * 1_000_000 + (seconds * 1_000_000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("00:00:01.50", Some(1_500_000))]
    #[case("01:02:03", Some(3_723_000_000))]
    #[case("N/A", None)]
    #[case("00:00", None)]
    fn test_parse_timestamp(#[case] stamp: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_timestamp_us(stamp), expected);
    }

    #[test]
    fn test_duration_from_log_line() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed_log_line("  Stream #0:0: Audio: flac").is_none());
        assert_eq!(
            parser.feed_log_line("  Duration: 00:00:10.00, start: 0.000000, bitrate: 1411 kb/s"),
            Some(10_000_000)
        );
        assert!(parser.feed_log_line("  Duration: N/A, bitrate: N/A").is_none());
        assert_eq!(parser.duration_us(), Some(10_000_000));
    }

    #[test]
    fn test_progress_lines() {
        let parser = ProgressParser::with_duration_us(10_000_000);
        assert_eq!(parser.feed_progress_line("out_time_us=2500000"), Some(0.25));
        assert_eq!(parser.feed_progress_line("out_time_ms=5000000"), Some(0.5));
        assert_eq!(parser.feed_progress_line("out_time=00:00:07.500000"), Some(0.75));
        assert_eq!(parser.feed_progress_line("out_time_us=99000000"), Some(1.0));
        assert_eq!(parser.feed_progress_line("bitrate=128.0kbits/s"), None);
        assert_eq!(parser.feed_progress_line("progress=continue"), None);
        assert_eq!(parser.feed_progress_line("progress=end"), Some(1.0));
    }

    #[test]
    fn test_unknown_duration_only_reports_end() {
        let parser = ProgressParser::new();
        assert_eq!(parser.feed_progress_line("out_time_us=2500000"), None);
        assert_eq!(parser.feed_progress_line("progress=end"), Some(1.0));
    }
}
