//! Exponential backoff with injectable jitter.
//!
//! `delay(attempt) = max(floor, min(cap, base * 2^attempt) + U(-jitter, +jitter))`
//!
//! The only nondeterminism is the jitter sample, which comes from a [`Jitter`]
//! source so tests can pin it.

use std::time::Duration;

use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::BackoffConfig;

/// Exponents beyond this saturate at the cap anyway.
const MAX_EXPONENT: u32 = 32;

/// Source of jitter offsets.
pub trait Jitter: Send {
    /// Returns an offset in `[-spread, +spread]` seconds.
    fn sample(&mut self, spread: f64) -> f64;
}

/// Uniform jitter from a ChaCha8 stream.
pub struct RandomJitter {
    rng: ChaCha8Rng,
}

impl RandomJitter {
    /// Seeds from the thread RNG.
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }

    /// Reproducible sequence for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Jitter for RandomJitter {
    fn sample(&mut self, spread: f64) -> f64 {
        if spread <= 0.0 {
            return 0.0;
        }
        self.rng.random_range(-spread..=spread)
    }
}

/// Always returns zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&mut self, _spread: f64) -> f64 {
        0.0
    }
}

/// Computes the wait before retry number `attempt` (0-based).
pub fn delay(attempt: u32, config: &BackoffConfig, jitter: &mut dyn Jitter) -> Duration {
    let exponent = attempt.min(MAX_EXPONENT) as i32;
    let raw = (config.base_secs * 2f64.powi(exponent)).min(config.cap_secs);
    let jittered = raw + jitter.sample(config.jitter_secs);
    Duration::from_secs_f64(jittered.max(config.floor_secs))
}

/// A [`BackoffConfig`] bound to a jitter source.
pub struct BackoffPolicy {
    config: BackoffConfig,
    jitter: Box<dyn Jitter>,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig, jitter: Box<dyn Jitter>) -> Self {
        Self { config, jitter }
    }

    /// Uses `config.seed` when set, otherwise a randomly seeded source.
    pub fn from_config(config: BackoffConfig) -> Self {
        let jitter: Box<dyn Jitter> = match config.seed {
            Some(seed) => Box::new(RandomJitter::seeded(seed)),
            None => Box::new(RandomJitter::new()),
        };
        Self::new(config, jitter)
    }

    pub fn delay(&mut self, attempt: u32) -> Duration {
        delay(attempt, &self.config, self.jitter.as_mut())
    }

    /// Backoff delay, stretched to honor a server `Retry-After` hint but never
    /// beyond the cap.
    pub fn delay_with_hint(&mut self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = self.delay(attempt);
        match hint {
            Some(hint) => {
                let cap = Duration::from_secs_f64(self.config.cap_secs);
                computed.max(hint.min(cap))
            }
            None => computed,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedJitter(f64);

    impl Jitter for FixedJitter {
        fn sample(&mut self, spread: f64) -> f64 {
            self.0.clamp(-spread, spread)
        }
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let config = BackoffConfig::default();
        let mut jitter = NoJitter;

        assert_eq!(delay(0, &config, &mut jitter), Duration::from_secs_f64(1.5));
        assert_eq!(delay(1, &config, &mut jitter), Duration::from_secs_f64(3.0));
        assert_eq!(delay(2, &config, &mut jitter), Duration::from_secs_f64(6.0));
        assert_eq!(delay(5, &config, &mut jitter), Duration::from_secs_f64(30.0));
        assert_eq!(delay(500, &config, &mut jitter), Duration::from_secs_f64(30.0));
    }

    #[test]
    fn test_delay_monotonic_without_jitter() {
        let config = BackoffConfig::default();
        let mut jitter = NoJitter;
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let current = delay(attempt, &config, &mut jitter);
            assert!(current >= previous, "attempt {} decreased", attempt);
            assert!(current <= Duration::from_secs_f64(config.cap_secs));
            previous = current;
        }
    }

    #[test]
    fn test_delay_respects_floor_with_negative_jitter() {
        let config = BackoffConfig {
            base_secs: 0.05,
            cap_secs: 1.0,
            jitter_secs: 0.5,
            floor_secs: 0.1,
            seed: None,
        };
        let mut jitter = FixedJitter(-0.5);
        for attempt in 0..10 {
            let d = delay(attempt, &config, &mut jitter);
            assert!(d >= Duration::from_secs_f64(0.1), "attempt {}: {:?}", attempt, d);
        }
    }

    #[test]
    fn test_random_jitter_stays_in_range() {
        let config = BackoffConfig::default();
        let mut jitter = RandomJitter::seeded(7);
        for attempt in 0..200 {
            let d = delay(attempt % 8, &config, &mut jitter).as_secs_f64();
            let center = (config.base_secs * 2f64.powi((attempt % 8) as i32)).min(config.cap_secs);
            assert!(d >= center - config.jitter_secs - 1e-9);
            assert!(d <= center + config.jitter_secs + 1e-9);
            assert!(d >= config.floor_secs);
        }
    }

    #[test]
    fn test_seeded_policy_is_reproducible() {
        let config = BackoffConfig {
            seed: Some(42),
            ..BackoffConfig::default()
        };
        let mut a = BackoffPolicy::from_config(config.clone());
        let mut b = BackoffPolicy::from_config(config);
        for attempt in 0..10 {
            assert_eq!(a.delay(attempt), b.delay(attempt));
        }
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let mut policy = BackoffPolicy::new(BackoffConfig::default(), Box::new(NoJitter));
        assert_eq!(
            policy.delay_with_hint(0, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            policy.delay_with_hint(0, Some(Duration::from_secs(3600))),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.delay_with_hint(2, Some(Duration::from_secs(1))),
            Duration::from_secs(6)
        );
    }
}
