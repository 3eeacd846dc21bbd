//! Classifies epoch timestamps against the lookback window.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::warn;

/// Decides whether a record is older than `now - lookback`.
#[derive(Debug, Clone, Copy)]
pub struct AgePolicy {
    lookback: TimeDelta,
}

impl AgePolicy {
    #[must_use]
    pub fn new(lookback: Duration) -> Self {
        Self {
            lookback: TimeDelta::from_std(lookback).unwrap_or(TimeDelta::MAX),
        }
    }

    /// The instant records must predate to count as old, computed fresh each call.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether `value` is strictly earlier than the cutoff as of the current time.
    #[must_use]
    pub fn is_old(&self, value: &Value) -> bool {
        self.is_old_at(value, Utc::now())
    }

    /// Same as [`is_old`](Self::is_old) against a fixed clock.
    ///
    /// Values that cannot be read as an epoch instant are logged and treated as
    /// not old, so a bad field never ends pagination early.
    #[must_use]
    pub fn is_old_at(&self, value: &Value, now: DateTime<Utc>) -> bool {
        match epoch_to_utc(value) {
            Some(instant) => instant < self.cutoff(now),
            None => {
                warn!(value = %value, "Malformed timestamp, treating as recent");
                false
            }
        }
    }
}

/// Convert an epoch-seconds JSON number (integer or float) into a UTC instant.
#[must_use]
pub fn epoch_to_utc(value: &Value) -> Option<DateTime<Utc>> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(secs) = number.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }
    let secs = number.as_f64()?;
    if !secs.is_finite() || secs < i64::MIN as f64 || secs >= i64::MAX as f64 {
        return None;
    }
    let whole = secs.floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = ((secs - whole) * 1e9) as u32;
    #[allow(clippy::cast_possible_truncation)]
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DAY: i64 = 86_400;

    fn policy(days: u64) -> AgePolicy {
        AgePolicy::new(Duration::from_secs(days * 86_400))
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_older_than_cutoff() {
        let ts = now().timestamp() - 101 * DAY;
        assert!(policy(100).is_old_at(&json!(ts), now()));
    }

    #[test]
    fn test_within_window() {
        let ts = now().timestamp() - 99 * DAY;
        assert!(!policy(100).is_old_at(&json!(ts), now()));
    }

    #[test]
    fn test_exact_cutoff_is_not_old() {
        let ts = now().timestamp() - 100 * DAY;
        assert!(!policy(100).is_old_at(&json!(ts), now()));
        assert!(policy(100).is_old_at(&json!(ts - 1), now()));
    }

    #[test]
    fn test_float_timestamps() {
        let cutoff = (now().timestamp() - 100 * DAY) as f64;
        assert!(policy(100).is_old_at(&json!(cutoff - 0.5), now()));
        assert!(!policy(100).is_old_at(&json!(cutoff + 0.5), now()));
    }

    #[test]
    fn test_malformed_is_not_old() {
        let p = policy(1);
        assert!(!p.is_old_at(&json!("1600000000"), now()));
        assert!(!p.is_old_at(&json!(null), now()));
        assert!(!p.is_old_at(&json!(1e300), now()));
        assert!(!p.is_old_at(&json!(i64::MAX), now()));
        assert!(!p.is_old_at(&json!(u64::MAX), now()));
    }

    #[test]
    fn test_epoch_to_utc() {
        assert_eq!(epoch_to_utc(&json!(1_700_000_000)), Some(now()));
        let half = epoch_to_utc(&json!(1_700_000_000.5)).unwrap();
        assert_eq!(half.timestamp_subsec_millis(), 500);
        assert_eq!(epoch_to_utc(&json!({"a": 1})), None);
    }
}
