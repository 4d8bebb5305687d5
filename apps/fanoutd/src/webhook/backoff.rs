//! Exponential backoff for webhook redelivery:
//! `min(cap, base * 2^(attempt-1)) + jitter`.

use std::time::Duration;

use rand::Rng;

pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);
const JITTER_MS: u64 = 250;

/// The deterministic half of the delay.
pub fn base_delay(attempt: u64) -> Duration {
    let exponent = attempt.max(1) - 1;
    // 2^9 already clears the cap, no need to shift further.
    let secs = BACKOFF_BASE.as_secs() << exponent.min(9);
    Duration::from_secs(secs).min(BACKOFF_CAP)
}

pub fn backoff_delay(attempt: u64) -> Duration {
    base_delay(attempt) + Duration::from_millis(rand::rng().random_range(0..=JITTER_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_one_second() {
        assert_eq!(base_delay(1), Duration::from_secs(1));
        assert_eq!(base_delay(2), Duration::from_secs(2));
        assert_eq!(base_delay(3), Duration::from_secs(4));
        assert_eq!(base_delay(6), Duration::from_secs(32));
    }

    #[test]
    fn caps_at_five_minutes() {
        assert_eq!(base_delay(9), Duration::from_secs(256));
        assert_eq!(base_delay(10), BACKOFF_CAP);
        assert_eq!(base_delay(64), BACKOFF_CAP);
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        assert_eq!(base_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_its_window() {
        for attempt in 1..6 {
            let base = base_delay(attempt);
            let jittered = backoff_delay(attempt);
            assert!(jittered >= base);
            assert!(jittered <= base + Duration::from_millis(JITTER_MS));
        }
    }
}
