use std::time::Duration;

use crate::error::{Error, Result};

/// Window applied when the request carries no `period` parameter.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Parse a `{N}{s|m}` period such as `1s`, `30s`, `1m` or `5m`.
pub fn parse_period(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (value, multiplier) = if let Some(value) = raw.strip_suffix('s') {
        (value, 1)
    } else if let Some(value) = raw.strip_suffix('m') {
        (value, 60)
    } else {
        return Err(Error::InvalidPeriod(raw.to_string()));
    };

    match value.parse::<u64>() {
        Ok(n) if n >= 1 => Ok(Duration::from_secs(n * multiplier)),
        _ => Err(Error::InvalidPeriod(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_documented_values() {
        let cases = [
            ("1s", 1),
            ("3s", 3),
            ("5s", 5),
            ("10s", 10),
            ("30s", 30),
            ("1m", 60),
            ("3m", 180),
            ("5m", 300),
        ];
        for (raw, secs) in cases {
            assert_eq!(parse_period(raw).unwrap(), Duration::from_secs(secs));
        }
    }

    #[test]
    fn rejects_other_syntax() {
        for raw in ["", "10", "1h", "s", "m", "-1s", "0s", "1.5m", "one-minute"] {
            assert!(parse_period(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(parse_period(" 30s ").unwrap(), Duration::from_secs(30));
    }
}
