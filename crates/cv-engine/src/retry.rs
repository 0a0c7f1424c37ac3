//! Rate-limit-aware retry policy
//!
//! Only failures that report themselves as rate limited are retried; every
//! other error is returned to the caller on the first attempt. Backoff grows
//! exponentially: `wait = min(max_wait, min_wait * multiplier^(attempt - 1))`.
//!
//! ```no_run
//! # async fn demo() -> cv_engine::Result<()> {
//! use cv_engine::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::rate_limit();
//! let page = policy
//!     .run("list dashboards", || async { Ok::<_, cv_engine::EngineError>(vec![1, 2, 3]) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::error::EngineError;

pub const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RATE_LIMIT_MIN_WAIT_MS: u64 = 4_000;
pub const DEFAULT_RATE_LIMIT_MAX_WAIT_MS: u64 = 120_000;
pub const DEFAULT_NETWORK_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_NETWORK_MIN_WAIT_MS: u64 = 1_000;
pub const DEFAULT_NETWORK_MAX_WAIT_MS: u64 = 10_000;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Waits are divided by this factor in accelerated mode
const ACCELERATION_FACTOR: u32 = 1_000;

/// Lets the policy tell throttling apart from every other failure
pub trait RateLimited {
    fn is_rate_limited(&self) -> bool;

    /// Server-suggested wait, when the throttle response carried one
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RateLimited for EngineError {
    fn is_rate_limited(&self) -> bool {
        self.is_rate_limit()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            EngineError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl RateLimited for ApiError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Attempt budget and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub multiplier: f64,
}

impl RetrySettings {
    /// Longer backoff, more attempts
    pub fn rate_limit() -> Self {
        Self {
            max_attempts: DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
            min_wait_ms: DEFAULT_RATE_LIMIT_MIN_WAIT_MS,
            max_wait_ms: DEFAULT_RATE_LIMIT_MAX_WAIT_MS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Shorter backoff, fewer attempts
    pub fn network() -> Self {
        Self {
            max_attempts: DEFAULT_NETWORK_MAX_ATTEMPTS,
            min_wait_ms: DEFAULT_NETWORK_MIN_WAIT_MS,
            max_wait_ms: DEFAULT_NETWORK_MAX_WAIT_MS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.min_wait_ms > self.max_wait_ms {
            return Err(format!(
                "min_wait_ms ({}) exceeds max_wait_ms ({})",
                self.min_wait_ms, self.max_wait_ms
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::rate_limit()
    }
}

/// Wall-clock behaviour of the backoff sleeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryTiming {
    #[default]
    Production,
    /// Same attempt schedule, waits shrunk a thousandfold
    Accelerated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    settings: RetrySettings,
    timing: RetryTiming,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            timing: RetryTiming::Production,
        }
    }

    pub fn rate_limit() -> Self {
        Self::new(RetrySettings::rate_limit())
    }

    pub fn network() -> Self {
        Self::new(RetrySettings::network())
    }

    pub fn with_timing(mut self, timing: RetryTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.settings.max_attempts = max_attempts.max(1);
        self
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn timing(&self) -> RetryTiming {
        self.timing
    }

    /// Wait after the given failed attempt (1-based), before timing is applied
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let wait = self.settings.min_wait_ms as f64 * self.settings.multiplier.powi(exponent);
        let capped = wait.min(self.settings.max_wait_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn sleep_for(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        let max_wait = Duration::from_millis(self.settings.max_wait_ms);
        let mut wait = self.backoff(attempt);
        if let Some(suggested) = suggested {
            wait = wait.max(suggested.min(max_wait));
        }
        match self.timing {
            RetryTiming::Production => wait,
            RetryTiming::Accelerated => wait / ACCELERATION_FACTOR,
        }
    }

    /// Run `operation`, retrying while it reports a rate limit and the
    /// attempt budget lasts. The final error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimited + Display,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                },
                Err(e) if e.is_rate_limited() && attempt < max_attempts => {
                    let wait = self.sleep_for(attempt, e.retry_after());
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        backoff_ms = wait.as_millis() as u64,
                        error = %e,
                        "Rate limited, retrying..."
                    );
                    tokio::time::sleep(wait).await;
                },
                Err(e) => {
                    if e.is_rate_limited() {
                        warn!(operation, attempt, error = %e, "Rate limit retries exhausted");
                    }
                    return Err(e);
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::rate_limit()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting<T, F>(
        attempts: Arc<AtomicU32>,
        f: F,
    ) -> impl FnMut() -> std::future::Ready<Result<T, EngineError>>
    where
        F: Fn(u32) -> Result<T, EngineError>,
    {
        move || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(f(n))
        }
    }

    #[test]
    fn test_backoff_formula() {
        let policy = RetryPolicy::new(RetrySettings {
            max_attempts: 10,
            min_wait_ms: 100,
            max_wait_ms: 1_000,
            multiplier: 2.0,
        });
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_profiles_differ() {
        let rate = RetrySettings::rate_limit();
        let network = RetrySettings::network();
        assert!(rate.max_attempts > network.max_attempts);
        assert!(rate.max_wait_ms > network.max_wait_ms);
        assert!(rate.validate().is_ok());
        assert!(network.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = RetrySettings::network();
        settings.max_attempts = 0;
        assert!(settings.validate().is_err());

        let mut settings = RetrySettings::network();
        settings.min_wait_ms = settings.max_wait_ms + 1;
        assert!(settings.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_uses_exact_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::rate_limit().with_max_attempts(5);

        let result: Result<(), _> = policy
            .run("list", counting(attempts.clone(), |_| Err(EngineError::rate_limited("429"))))
            .await;

        assert!(matches!(result, Err(EngineError::RateLimit { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::rate_limit();

        let result: Result<(), _> = policy
            .run("list", counting(attempts.clone(), |_| Err(EngineError::Auth("401".into()))))
            .await;

        assert!(matches!(result, Err(EngineError::Auth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accelerated_timing_recovers_on_third_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::rate_limit()
            .with_max_attempts(5)
            .with_timing(RetryTiming::Accelerated);

        let started = std::time::Instant::now();
        let result = policy
            .run(
                "list",
                counting(attempts.clone(), |n| {
                    if n < 3 {
                        Err(EngineError::rate_limited("429"))
                    } else {
                        Ok(vec!["page"])
                    }
                }),
            )
            .await
            .unwrap();

        assert_eq!(result, vec!["page"]);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 4s + 8s of production backoff collapses to ~12ms
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_extends_wait() {
        let policy = RetryPolicy::network();
        let wait = policy.sleep_for(1, Some(Duration::from_secs(5)));
        assert_eq!(wait, Duration::from_secs(5));

        // Capped by max_wait
        let wait = policy.sleep_for(1, Some(Duration::from_secs(600)));
        assert_eq!(wait, Duration::from_millis(DEFAULT_NETWORK_MAX_WAIT_MS));
    }
}
