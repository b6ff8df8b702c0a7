//! Parse human durations such as `2h30m`, `30s`, `1.5m`, or `500ms`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration {input:?}: {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: String,
}

/// Parse a sequence of `<number><unit>` terms.
///
/// Units: `h`, `m`, `s`, `ms`, `us`/`µs`, `ns`. Numbers may have a fractional
/// part. A bare `0` is accepted; any other unitless number is rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let fail = |reason: &str| DurationError {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(fail("empty"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = trimmed;
    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(fail("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| fail("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(fail("missing unit"));
        }
        let scale = match &rest[..unit_len] {
            "h" => 3_600e9,
            "m" => 60e9,
            "s" => 1e9,
            "ms" => 1e6,
            "us" | "µs" => 1e3,
            "ns" => 1.0,
            _ => return Err(fail("unknown unit")),
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(fail("out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Render a duration compactly, e.g. `1h2m3s`, `2.5s`, `120ms`.
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs == 0 {
        let millis = duration.as_millis();
        if millis == 0 {
            return "0s".to_string();
        }
        return format!("{millis}ms");
    }
    if total_secs < 60 {
        let secs = duration.as_secs_f64();
        if duration.subsec_millis() == 0 {
            return format!("{total_secs}s");
        }
        return format!("{secs:.1}s");
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 || hours > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{seconds}s"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_duration("2h30m").expect("parse"),
            Duration::from_secs(2 * 3600 + 30 * 60)
        );
        assert_eq!(parse_duration("30s").expect("parse"), Duration::from_secs(30));
        assert_eq!(
            parse_duration("1.5m").expect("parse"),
            Duration::from_secs(90)
        );
        assert_eq!(
            parse_duration("500ms").expect("parse"),
            Duration::from_millis(500)
        );
        assert_eq!(
            parse_duration("1m30s250ms").expect("parse"),
            Duration::from_millis(90_250)
        );
    }

    #[test]
    fn zero_is_allowed_without_unit() {
        assert_eq!(parse_duration("0").expect("parse"), Duration::ZERO);
        assert_eq!(parse_duration("0s").expect("parse"), Duration::ZERO);
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "10", "abc", "5x", "h", "1..5s", "-5s"] {
            assert!(parse_duration(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn formats_compactly() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(10)), "10ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
    }
}
