//! Retry policy with jittered exponential back-off.

use std::time::Duration;

use hamcp_domain::config::RetryConfig;
use reqwest::Method;

/// Controls how often and how late a transient upstream failure is retried.
/// The same policy paces event-stream reconnects.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the un-jittered delay.
    pub max_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_retries: cfg.max_retries,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay for the given retry (0-indexed): `base * 2^n`,
    /// capped at `max_delay`.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before the given retry, jittered into `[ceiling/2, ceiling]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        ceiling.mul_f64(0.5 + 0.5 * rand::random::<f64>())
    }

    /// Whether `retries_done` has used up the budget.
    pub fn should_give_up(&self, retries_done: u32) -> bool {
        retries_done >= self.max_retries
    }
}

/// Methods whose repetition cannot duplicate a side effect.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay, Duration::from_millis(500));
        assert_eq!(p.max_delay, Duration::from_secs(8));
        assert_eq!(p.max_retries, 3);
    }

    #[test]
    fn ceiling_doubles_then_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.ceiling_for_attempt(0), Duration::from_millis(500));
        assert_eq!(p.ceiling_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(p.ceiling_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(p.ceiling_for_attempt(40), Duration::from_millis(8000));
    }

    #[test]
    fn jitter_stays_within_half_to_full_ceiling() {
        let p = RetryPolicy::default();
        for attempt in 0..6 {
            let ceiling = p.ceiling_for_attempt(attempt);
            for _ in 0..50 {
                let d = p.delay_for_attempt(attempt);
                assert!(d <= ceiling, "{d:?} > {ceiling:?}");
                assert!(d >= ceiling / 2, "{d:?} < {:?}", ceiling / 2);
            }
        }
    }

    #[test]
    fn gives_up_after_budget() {
        let p = RetryPolicy::default();
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
    }

    #[test]
    fn only_idempotent_methods_qualify() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::PUT));
        assert!(is_idempotent(&Method::DELETE));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }
}
