//! Restart intensity: a `(max restarts, window)` pair bounding how fast a
//! supervisor will respawn children before giving up on itself (spec §4.4,
//! testable property P7).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use swarm_core::duration::DurationMs;

/// A `(max restarts, window)` pair. Restarts are counted over a sliding
/// window of this length; once the count within the window would exceed
/// `max_restarts`, the owning supervisor shuts itself down rather than
/// restart again.
#[derive(Debug, Clone, Copy)]
pub struct RestartIntensity {
    /// Maximum restarts tolerated within `window` before giving up.
    pub max_restarts: u32,
    /// Sliding window length.
    pub window: DurationMs,
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            window: DurationMs::from_secs(5),
        }
    }
}

/// Tracks restart timestamps for one supervisor and evaluates the
/// intensity policy on each new failure.
pub struct IntensityTracker {
    policy: RestartIntensity,
    failures: Mutex<VecDeque<Instant>>,
}

impl IntensityTracker {
    /// Build a tracker for the given policy, with no recorded failures yet.
    pub fn new(policy: RestartIntensity) -> Self {
        Self {
            policy,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a failure now and evaluate whether a restart may proceed.
    ///
    /// Drops failure timestamps that have aged out of the window, then
    /// appends the current one. Returns `true` if the restart should go
    /// ahead (count is still within `max_restarts`), `false` if the
    /// supervisor has exceeded its intensity and must give up.
    pub fn record_and_check(&self) -> bool {
        let now = Instant::now();
        let mut failures = self.failures.lock().unwrap();
        while let Some(&front) = failures.front() {
            if now.duration_since(front) > self.policy.window.to_std() {
                failures.pop_front();
            } else {
                break;
            }
        }
        failures.push_back(now);
        failures.len() as u32 <= self.policy.max_restarts
    }

    /// Number of restarts currently counted within the window. Useful as
    /// the "attempt" input to a backoff schedule.
    pub fn current_count(&self) -> u32 {
        self.failures.lock().unwrap().len() as u32
    }

    /// Forget all recorded failures (used when a supervisor is reset,
    /// e.g. after `StartChild`/`DeleteChild` reshape its child list).
    pub fn reset(&self) {
        self.failures.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn allows_restarts_up_to_max() {
        let tracker = IntensityTracker::new(RestartIntensity {
            max_restarts: 2,
            window: DurationMs::from_secs(60),
        });
        assert!(tracker.record_and_check());
        assert!(tracker.record_and_check());
        assert!(!tracker.record_and_check());
    }

    #[test]
    fn old_failures_age_out_of_the_window() {
        let tracker = IntensityTracker::new(RestartIntensity {
            max_restarts: 1,
            window: DurationMs::from_millis(20),
        });
        assert!(tracker.record_and_check());
        sleep(Duration::from_millis(40));
        // the first failure aged out, so this is effectively the first
        // failure within the current window
        assert!(tracker.record_and_check());
    }
}
