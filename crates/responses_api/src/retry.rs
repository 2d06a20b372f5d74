use std::sync::OnceLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;

/// Retry policy for the initial request leg. Streams that have already
/// emitted an event are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// ±25 % jitter; disabled in deterministic tests.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), or the server-provided
    /// `retry_after` when present.
    #[must_use]
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(after) = retry_after {
            return after.min(self.max_delay);
        }

        let exponent = attempt.min(16);
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);
        if !self.jitter {
            return base;
        }

        let millis = base.as_millis() as u64;
        let spread = millis / 4;
        let jittered = rand::thread_rng().gen_range(millis.saturating_sub(spread)..=millis + spread);
        Duration::from_millis(jittered).min(self.max_delay)
    }
}

fn retryable_text_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused")
            .expect("retry regex must compile")
    })
}

/// Transient-failure policy: retryable statuses or known transient error text.
#[must_use]
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504) || retryable_text_regex().is_match(error_text)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{is_retryable_http_error, RetryPolicy};

    #[test]
    fn delays_double_per_attempt_and_cap_at_max() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(0, None), Duration::from_millis(500));
        assert_eq!(policy.delay(1, None), Duration::from_millis(1000));
        assert_eq!(policy.delay(2, None), Duration::from_millis(2000));
        assert_eq!(policy.delay(30, None), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_header_takes_precedence() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay(0, Some(Duration::from_secs(300))),
            Duration::from_secs(30),
            "retry-after is still capped"
        );
    }

    #[test]
    fn jittered_delays_stay_within_a_quarter_of_the_base() {
        let policy = RetryPolicy::default();
        for _ in 0..32 {
            let delay = policy.delay(1, None).as_millis() as i64;
            assert!((750..=1250).contains(&delay), "delay {delay}ms out of range");
        }
    }

    #[test]
    fn statuses_and_transient_text_drive_retryability() {
        assert!(is_retryable_http_error(429, ""));
        assert!(is_retryable_http_error(503, ""));
        assert!(is_retryable_http_error(0, "upstream connect error"));
        assert!(!is_retryable_http_error(401, "unauthorized"));
        assert!(!is_retryable_http_error(404, "not found"));
    }
}
