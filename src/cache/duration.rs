//! Human-readable cache durations.
//!
//! A duration is either a millisecond count or a string like `"10 minutes"`.
//! Anything that does not resolve to a positive number of milliseconds falls
//! back to the configured default.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::error::{CacheError, CacheResult};

const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
// Calendar approximations: 30-day months, 365-day years.
const MONTH: u64 = 30 * DAY;
const YEAR: u64 = 365 * DAY;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s+(\w+)$").expect("duration grammar is a valid regex")
});

/// A cache duration as supplied by the caller.
///
/// Deserializes from either a JSON number or a string.
///
/// ```
/// use rttp_cache::cache::DurationSpec;
///
/// assert_eq!(DurationSpec::from("2 hours").parse().unwrap(), 7_200_000);
/// assert_eq!(DurationSpec::from(1500).parse().unwrap(), 1_500);
/// assert!(DurationSpec::from("soon").parse().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Millis(i64),
    Text(String),
}

impl DurationSpec {
    /// Resolves to milliseconds, or fails when the value is malformed or not
    /// positive.
    pub fn parse(&self) -> CacheResult<u64> {
        let millis = match self {
            Self::Millis(ms) => u64::try_from(*ms).ok(),
            Self::Text(text) => parse_text(text.trim()),
        };
        match millis {
            Some(ms) if ms > 0 => Ok(ms),
            _ => Err(CacheError::MalformedDuration {
                input: self.to_string(),
            }),
        }
    }

    /// Resolves to milliseconds, substituting `default_ms` for anything
    /// [`parse`](Self::parse) rejects.
    pub fn resolve(&self, default_ms: u64) -> u64 {
        self.parse().unwrap_or_else(|err| {
            debug!(error = %err, default_ms, "using default cache duration");
            default_ms
        })
    }
}

fn parse_text(text: &str) -> Option<u64> {
    let caps = DURATION_RE.captures(text)?;
    let count: u64 = caps[1].parse().ok()?;
    let unit_ms = unit_millis(&caps[2])?;
    Some(count.saturating_mul(unit_ms))
}

fn unit_millis(unit: &str) -> Option<u64> {
    let mut unit = unit.to_ascii_lowercase();
    if !unit.ends_with('s') {
        unit.push('s');
    }
    match unit.as_str() {
        "seconds" => Some(SECOND),
        "minutes" => Some(MINUTE),
        "hours" => Some(HOUR),
        "days" => Some(DAY),
        "weeks" => Some(WEEK),
        "months" => Some(MONTH),
        "years" => Some(YEAR),
        _ => None,
    }
}

impl std::fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for DurationSpec {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for DurationSpec {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<i64> for DurationSpec {
    fn from(ms: i64) -> Self {
        Self::Millis(ms)
    }
}

impl From<i32> for DurationSpec {
    fn from(ms: i32) -> Self {
        Self::Millis(i64::from(ms))
    }
}

impl From<u64> for DurationSpec {
    fn from(ms: u64) -> Self {
        Self::Millis(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

impl From<std::time::Duration> for DurationSpec {
    fn from(d: std::time::Duration) -> Self {
        Self::Millis(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: u64 = 3_600_000;

    #[test]
    fn named_units() {
        assert_eq!(DurationSpec::from("10 minutes").resolve(DEFAULT), 600_000);
        assert_eq!(DurationSpec::from("2 hours").resolve(DEFAULT), 7_200_000);
        assert_eq!(DurationSpec::from("1 day").resolve(DEFAULT), 86_400_000);
        assert_eq!(DurationSpec::from("3 weeks").resolve(DEFAULT), 3 * WEEK);
    }

    #[test]
    fn singular_and_plural_agree() {
        assert_eq!(
            DurationSpec::from("1 second").parse().unwrap(),
            DurationSpec::from("1 seconds").parse().unwrap()
        );
        assert_eq!(DurationSpec::from("5 Minute").parse().unwrap(), 5 * MINUTE);
    }

    #[test]
    fn month_and_year_are_approximations() {
        assert_eq!(DurationSpec::from("1 month").parse().unwrap(), 2_592_000_000);
        assert_eq!(DurationSpec::from("1 year").parse().unwrap(), 31_536_000_000);
    }

    #[test]
    fn rejected_inputs_fall_back() {
        for bad in ["abc", "10", "minutes", "10minutes", "ten minutes", "4 fortnights", "0 days"] {
            assert_eq!(DurationSpec::from(bad).resolve(DEFAULT), DEFAULT, "{bad}");
        }
        assert_eq!(DurationSpec::from(0).resolve(DEFAULT), DEFAULT);
        assert_eq!(DurationSpec::from(-50).resolve(DEFAULT), DEFAULT);
    }

    #[test]
    fn numeric_is_milliseconds() {
        assert_eq!(DurationSpec::from(250).resolve(DEFAULT), 250);
        assert_eq!(
            DurationSpec::from(std::time::Duration::from_secs(2)).resolve(DEFAULT),
            2_000
        );
    }

    #[test]
    fn malformed_error_names_input() {
        let err = DurationSpec::from("soon").parse().unwrap_err();
        assert!(matches!(err, CacheError::MalformedDuration { ref input } if input == "soon"));
    }

    #[test]
    fn deserializes_number_or_string() {
        let n: DurationSpec = serde_json::from_str("1000").unwrap();
        let s: DurationSpec = serde_json::from_str(r#""1 hour""#).unwrap();
        assert_eq!(n, DurationSpec::Millis(1000));
        assert_eq!(s.parse().unwrap(), HOUR);
    }
}
