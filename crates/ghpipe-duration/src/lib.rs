//! Parsing and formatting for the pipeline's compound interval grammar:
//! `NdNhNmNs`, e.g. `"5m"`, `"1h30m"`, `"2d12h"`. Each unit is optional,
//! repeats are summed, and the zero duration is rejected — this is
//! intentionally narrower than `humantime`'s grammar (no "ms", no
//! fractional values, no whitespace) to match exactly what the monitor's
//! `--interval` flag historically accepted.

use std::fmt;
use std::time::Duration;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration format: {0:?}. Expected format like '5m', '1h30m', '2d', etc.")]
    Invalid(String),
    #[error("duration must be positive, got \"0s\"")]
    Zero,
}

/// Parse a compound duration string into a total [`Duration`].
///
/// Accepts any subset of `d`/`h`/`m`/`s` components, in any order, case
/// insensitively; repeated units are summed. The entire string must be
/// consumed by `(digits)(unit)` pairs or the input is rejected. The
/// all-zero duration (including the literal `"0s"`) is rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let lower = input.to_lowercase();
    let mut chars = lower.char_indices().peekable();
    let mut total_secs: u64 = 0;
    let mut consumed = String::new();
    let mut matched_any = false;

    while let Some(&(start, c)) = chars.peek() {
        if !c.is_ascii_digit() {
            return Err(DurationParseError::Invalid(input.to_string()));
        }
        let mut end = start;
        while let Some(&(idx, c)) = chars.peek() {
            if c.is_ascii_digit() {
                end = idx + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let digits = &lower[start..end];
        let Some(&(_, unit)) = chars.peek() else {
            return Err(DurationParseError::Invalid(input.to_string()));
        };
        let per_unit = match unit {
            'd' => SECS_PER_DAY,
            'h' => SECS_PER_HOUR,
            'm' => SECS_PER_MINUTE,
            's' => 1,
            _ => return Err(DurationParseError::Invalid(input.to_string())),
        };
        chars.next();

        let value: u64 = digits
            .parse()
            .map_err(|_| DurationParseError::Invalid(input.to_string()))?;
        total_secs = total_secs.saturating_add(value.saturating_mul(per_unit));
        consumed.push_str(digits);
        consumed.push(unit);
        matched_any = true;
    }

    if !matched_any || consumed != lower {
        return Err(DurationParseError::Invalid(input.to_string()));
    }
    if total_secs == 0 {
        return Err(DurationParseError::Zero);
    }

    Ok(Duration::from_secs(total_secs))
}

/// Render a [`Duration`] back into canonical `NdNhNmNs` form: unit order
/// fixed at d, h, m, s, zero-valued components omitted. Sub-second
/// precision is truncated (the grammar has no fractional component).
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    let days = secs / SECS_PER_DAY;
    secs %= SECS_PER_DAY;
    let hours = secs / SECS_PER_HOUR;
    secs %= SECS_PER_HOUR;
    let minutes = secs / SECS_PER_MINUTE;
    secs %= SECS_PER_MINUTE;
    let seconds = secs;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

/// Newtype wrapper so `clap` (or any `FromStr`-based parser) can parse the
/// interval grammar directly on a struct field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalDuration(pub Duration);

impl IntervalDuration {
    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl std::str::FromStr for IntervalDuration {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(IntervalDuration)
    }
}

impl fmt::Display for IntervalDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration(self.0))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for IntervalDuration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(self.0))
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for IntervalDuration {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172800));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(5400)
        );
        assert_eq!(
            parse_duration("2d12h").unwrap(),
            Duration::from_secs(2 * 86400 + 12 * 3600)
        );
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(parse_duration("1H30M").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn sums_repeated_units() {
        assert_eq!(parse_duration("1h1h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
    }

    #[test]
    fn rejects_zero() {
        assert_eq!(parse_duration("0s"), Err(DurationParseError::Zero));
        assert_eq!(parse_duration("0d0h0m0s"), Err(DurationParseError::Zero));
    }

    #[test]
    fn rejects_garbage_suffix() {
        assert!(parse_duration("5mx").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("5m ").is_err());
    }

    #[test]
    fn format_omits_zero_components() {
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(
            format_duration(Duration::from_secs(2 * 86400 + 12 * 3600)),
            "2d12h"
        );
    }

    #[test]
    fn format_zero_duration_is_0s() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
    }

    #[test]
    fn round_trip_canonical_forms() {
        for s in ["5m", "1h30m", "2d12h", "1d", "59s", "1d2h3m4s"] {
            let parsed = parse_duration(s).unwrap();
            assert_eq!(format_duration(parsed), s, "round trip for {s}");
        }
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_any_positive_composition(
            d in 0u64..5, h in 0u64..24, m in 0u64..60, s in 1u64..60,
        ) {
            let mut input = String::new();
            if d > 0 { input.push_str(&format!("{d}d")); }
            if h > 0 { input.push_str(&format!("{h}h")); }
            if m > 0 { input.push_str(&format!("{m}m")); }
            input.push_str(&format!("{s}s"));

            let parsed = parse_duration(&input).unwrap();
            let rendered = format_duration(parsed);
            let reparsed = parse_duration(&rendered).unwrap();
            prop_assert_eq!(parsed, reparsed);
            prop_assert_eq!(rendered, input);
        }
    }
}
