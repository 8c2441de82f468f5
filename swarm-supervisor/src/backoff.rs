//! Backoff schedule between restart attempts.
//!
//! Shape grounded on `RestartPolicyConfig`/`BackoffStrategyConfig` from
//! `examples/newrelic-newrelic-agent-control` (a tagged enum of
//! none/fixed/linear/exponential backoff types with delay/max-retries
//! fields), adapted to this workspace's plain `serde`/`thiserror` stack
//! rather than that example's `duration_str`/`wrapper_with_default` macro
//! crates. Deliberately mirrors `swarm_process::agent::RetryBackoff`'s
//! shape — a different crate, a different concern (restart cadence vs.
//! provider-call cadence), so duplicating the small math rather than
//! introducing a cross-crate dependency for it is the right call here.

use swarm_core::duration::DurationMs;

/// Growth strategy for the delay between restart attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffKind {
    /// Same delay every attempt.
    Constant,
    /// `initial * attempt`.
    Linear,
    /// `initial * multiplier^(attempt - 1)`.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

/// Backoff schedule for supervisor restarts (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Growth strategy.
    pub kind: BackoffKind,
    /// Delay before the first restart.
    pub initial: DurationMs,
    /// Delay ceiling, regardless of growth.
    pub max: DurationMs,
    /// Jitter fraction in `[0, 1]`; actual delay is `base * (1 + jitter * U(-1,1))`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential { multiplier: 2.0 },
            initial: DurationMs::from_millis(100),
            max: DurationMs::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// A fixed delay on every attempt, no growth.
    pub fn constant(delay: DurationMs) -> Self {
        Self {
            kind: BackoffKind::Constant,
            initial: delay,
            max: delay,
            jitter: 0.0,
        }
    }

    /// Compute the base delay (before jitter) for the given 1-indexed attempt.
    pub fn base_delay(&self, attempt: u32) -> DurationMs {
        let attempt = attempt.max(1);
        let ms = match self.kind {
            BackoffKind::Constant => self.initial.as_millis(),
            BackoffKind::Linear => self.initial.as_millis().saturating_mul(attempt as u64),
            BackoffKind::Exponential { multiplier } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                (self.initial.as_millis() as f64 * factor) as u64
            }
        };
        DurationMs::from_millis(ms.min(self.max.as_millis()))
    }

    /// Apply jitter to a base delay using a uniform sample in `[-1, 1]`.
    pub fn jittered(&self, base: DurationMs, sample: f64) -> DurationMs {
        let factor = 1.0 + self.jitter * sample.clamp(-1.0, 1.0);
        let ms = (base.as_millis() as f64 * factor).max(0.0) as u64;
        DurationMs::from_millis(ms.min(self.max.as_millis()))
    }

    /// `base_delay` then `jittered` against `rand`, in one call.
    pub fn delay_for_attempt(&self, attempt: u32) -> DurationMs {
        let base = self.base_delay(attempt);
        let sample = rand::Rng::gen_range(&mut rand::thread_rng(), -1.0f64..=1.0f64);
        self.jittered(base, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_never_grows() {
        let b = BackoffConfig::constant(DurationMs::from_millis(500));
        assert_eq!(b.base_delay(1).as_millis(), 500);
        assert_eq!(b.base_delay(5).as_millis(), 500);
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let b = BackoffConfig {
            kind: BackoffKind::Linear,
            initial: DurationMs::from_millis(100),
            max: DurationMs::from_secs(5),
            jitter: 0.0,
        };
        assert_eq!(b.base_delay(1).as_millis(), 100);
        assert_eq!(b.base_delay(3).as_millis(), 300);
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let b = BackoffConfig {
            kind: BackoffKind::Exponential { multiplier: 3.0 },
            initial: DurationMs::from_millis(100),
            max: DurationMs::from_millis(800),
            jitter: 0.0,
        };
        assert_eq!(b.base_delay(1).as_millis(), 100);
        assert_eq!(b.base_delay(2).as_millis(), 300);
        assert_eq!(b.base_delay(3).as_millis(), 800); // would be 900, capped
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let b = BackoffConfig {
            kind: BackoffKind::Constant,
            initial: DurationMs::from_millis(1000),
            max: DurationMs::from_millis(1000),
            jitter: 0.2,
        };
        let base = b.base_delay(1);
        assert_eq!(b.jittered(base, 1.0).as_millis(), 1000); // capped
        assert_eq!(b.jittered(base, -1.0).as_millis(), 800);
        assert_eq!(b.jittered(base, 0.0).as_millis(), 1000);
    }
}
