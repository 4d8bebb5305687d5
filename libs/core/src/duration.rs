//! Human duration strings ("100ms", "2s", "15m") as used by the `retry_in`
//! nack field and the schedule `in` shorthand.

use std::time::Duration;

use crate::{Error, Result};

/// Parses `<number><unit>` where unit is one of ms, s, m, h, d.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::invalid("duration must not be empty"));
    }
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::invalid(format!("duration {raw:?} is missing a unit")))?;
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::invalid(format!("duration {raw:?} has no leading number")))?;
    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        "d" => Duration::from_secs(value * 86_400),
        _ => {
            return Err(Error::invalid(format!(
                "duration {raw:?} has unknown unit {unit:?}"
            )));
        }
    };
    Ok(duration)
}
