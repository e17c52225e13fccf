//! Retry timing for destination-platform calls (message posts and edits).

use std::time::Duration;

/// Controls how many times a failed platform call is retried and how long
/// to wait between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Cap for both backoff and platform-provided retry-after values.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Whether an HTTP status is worth retrying: rate limits and server errors.
pub fn is_recoverable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Extract the platform's `retry_after` hint (fractional seconds) from a
/// rate-limit response body. `None` when absent or not valid JSON.
pub fn parse_retry_after(body: &str) -> Option<Duration> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = v.get("retry_after")?.as_f64()?;
    if secs.is_sign_negative() {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

/// Delay before retry number `attempt` (0-based).
///
/// A platform-provided `retry_after` wins, capped at `policy.max_delay`;
/// otherwise exponential backoff from `policy.base_delay`.
pub fn delay_for_attempt(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(hint) = retry_after {
        return hint.min(policy.max_delay);
    }
    let backoff = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    backoff.min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_statuses() {
        assert!(is_recoverable(429));
        assert!(is_recoverable(500));
        assert!(is_recoverable(503));
        assert!(!is_recoverable(400));
        assert!(!is_recoverable(404));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            parse_retry_after(r#"{"retry_after": 1.5}"#),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after(r#"{"message": "err"}"#), None);
        assert_eq!(parse_retry_after("not json"), None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(
            delay_for_attempt(&policy, 0, None),
            Duration::from_millis(500)
        );
        assert_eq!(
            delay_for_attempt(&policy, 1, None),
            Duration::from_secs(1)
        );
        assert_eq!(
            delay_for_attempt(&policy, 10, None),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_retry_after_hint_wins_but_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            delay_for_attempt(&policy, 0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            delay_for_attempt(&policy, 0, Some(Duration::from_secs(120))),
            Duration::from_secs(30)
        );
    }
}
