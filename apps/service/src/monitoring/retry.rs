//! Retry attempts and backoff delays with jitter.
//!
//! The policy only computes numbers. Whether an outcome deserves another
//! attempt is up to the caller.

use std::time::Duration;

use rand::Rng;

use crate::models::{JitterStrategy, RetrySettings, RetryStrategy};

const DEFAULT_FACTOR: f64 = 2.0;
const DEFAULT_JITTER_FACTOR: f64 = 1.0;
/// Ceiling when a check sets no `max_delay`
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    retries: u32,
    base_delay: Duration,
    factor: f64,
    max_delay: Duration,
    jitter: JitterStrategy,
    jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            strategy: settings.strategy,
            retries: settings.count,
            base_delay: settings.delay.map(|d| d.as_duration()).unwrap_or_default(),
            factor: settings.factor.filter(|f| *f > 0.0).unwrap_or(DEFAULT_FACTOR),
            max_delay: settings
                .max_delay
                .map(|d| d.as_duration())
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_MAX_DELAY),
            jitter: settings.jitter,
            jitter_factor: settings
                .jitter_factor
                .filter(|f| *f > 0.0)
                .unwrap_or(DEFAULT_JITTER_FACTOR),
        }
    }

    /// Total attempts including the first one
    pub fn attempts(&self) -> u32 {
        match self.strategy {
            RetryStrategy::None => 1,
            _ => 1 + self.retries,
        }
    }

    /// Backoff before jitter and clamping. `attempt` is zero-based.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            RetryStrategy::Exponential => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                scale(self.base_delay, self.factor.powi(exponent))
            }
        }
    }

    /// Delay to wait after attempt `attempt` failed.
    pub fn delay(&self, attempt: u32, previous: Duration) -> Duration {
        self.delay_with_rng(attempt, previous, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        previous: Duration,
        rng: &mut R,
    ) -> Duration {
        let raw = self.raw_delay(attempt);
        if raw.is_zero() {
            return Duration::ZERO;
        }

        self.jitter(raw, previous, rng).min(self.max_delay)
    }

    fn jitter<R: Rng + ?Sized>(&self, delay: Duration, previous: Duration, rng: &mut R) -> Duration {
        let delay_secs = delay.as_secs_f64();
        let factor = self.jitter_factor;
        let uniform = |rng: &mut R, low: f64, high: f64| {
            if high > low { rng.gen_range(low..high) } else { low }
        };

        let secs = match self.jitter {
            JitterStrategy::None => return delay,
            JitterStrategy::Full => uniform(rng, 0.0, delay_secs * factor),
            JitterStrategy::Equal => {
                uniform(rng, 0.5 * delay_secs * factor, delay_secs * factor)
            }
            JitterStrategy::Decorrelated => {
                let ceiling = delay_secs.max(3.0 * previous.as_secs_f64()) * factor;
                uniform(rng, delay_secs, ceiling)
            }
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

fn scale(delay: Duration, by: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * by).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::models::TimeValue;

    fn settings(strategy: RetryStrategy, jitter: JitterStrategy) -> RetrySettings {
        RetrySettings {
            strategy,
            count: 3,
            delay: Some(TimeValue::millis(1000)),
            jitter,
            ..Default::default()
        }
    }

    #[test]
    fn no_retries_means_one_attempt_and_no_delay() {
        let policy = RetryPolicy::from_settings(&RetrySettings { count: 5, ..Default::default() });
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.delay(0, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn attempts_include_first_try() {
        let policy = RetryPolicy::from_settings(&settings(RetryStrategy::Fixed, JitterStrategy::None));
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn raw_delays_per_strategy() {
        let fixed = RetryPolicy::from_settings(&settings(RetryStrategy::Fixed, JitterStrategy::None));
        assert_eq!(fixed.raw_delay(2), Duration::from_millis(1000));

        let linear = RetryPolicy::from_settings(&settings(RetryStrategy::Linear, JitterStrategy::None));
        assert_eq!(linear.raw_delay(0), Duration::from_millis(1000));
        assert_eq!(linear.raw_delay(2), Duration::from_millis(3000));

        let exponential =
            RetryPolicy::from_settings(&settings(RetryStrategy::Exponential, JitterStrategy::None));
        for attempt in 0..5 {
            let expected = 1000.0 * 2f64.powi(attempt as i32);
            let actual = exponential.raw_delay(attempt).as_secs_f64() * 1000.0;
            assert!((actual - expected).abs() < 1.0, "attempt {attempt}: {actual} != {expected}");
        }
    }

    #[test]
    fn custom_exponential_factor() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            factor: Some(3.0),
            ..settings(RetryStrategy::Exponential, JitterStrategy::None)
        });
        assert_eq!(policy.raw_delay(2), Duration::from_millis(9000));
    }

    #[test]
    fn full_jitter_stays_below_raw_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = RetryPolicy::from_settings(&RetrySettings {
            jitter_factor: Some(0.5),
            ..settings(RetryStrategy::Fixed, JitterStrategy::Full)
        });
        for _ in 0..500 {
            let delay = policy.delay_with_rng(0, Duration::ZERO, &mut rng);
            assert!(delay < Duration::from_millis(500), "{delay:?}");
        }
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let mut rng = StdRng::seed_from_u64(11);
        let policy = RetryPolicy::from_settings(&settings(RetryStrategy::Fixed, JitterStrategy::Equal));
        for _ in 0..500 {
            let delay = policy.delay_with_rng(1, Duration::ZERO, &mut rng);
            assert!(delay >= Duration::from_millis(500) && delay < Duration::from_millis(1000));
        }
    }

    #[test]
    fn decorrelated_jitter_grows_from_previous() {
        let mut rng = StdRng::seed_from_u64(3);
        let policy =
            RetryPolicy::from_settings(&settings(RetryStrategy::Fixed, JitterStrategy::Decorrelated));
        for _ in 0..500 {
            let delay = policy.delay_with_rng(1, Duration::from_millis(2000), &mut rng);
            assert!(delay >= Duration::from_millis(1000) && delay < Duration::from_millis(6000));
        }
        assert_eq!(
            policy.delay_with_rng(0, Duration::ZERO, &mut rng),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn max_delay_clamps_exactly() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_delay: Some(TimeValue::seconds(5)),
            ..settings(RetryStrategy::Exponential, JitterStrategy::None)
        });
        assert_eq!(policy.delay(2, Duration::ZERO), Duration::from_millis(4000));
        assert_eq!(policy.delay(4, Duration::ZERO), Duration::from_secs(5));
    }

    #[test]
    fn unbounded_backoff_is_capped() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            count: 30,
            ..settings(RetryStrategy::Exponential, JitterStrategy::None)
        });
        assert_eq!(policy.delay(5, Duration::ZERO), Duration::from_secs(32));
        assert_eq!(policy.delay(20, Duration::ZERO), DEFAULT_MAX_DELAY);

        let mut rng = StdRng::seed_from_u64(5);
        let decorrelated = RetryPolicy::from_settings(&RetrySettings {
            count: 30,
            ..settings(RetryStrategy::Fixed, JitterStrategy::Decorrelated)
        });
        let mut previous = Duration::ZERO;
        for attempt in 0..30 {
            previous = decorrelated.delay_with_rng(attempt, previous, &mut rng);
            assert!(previous <= DEFAULT_MAX_DELAY);
        }
    }
}
