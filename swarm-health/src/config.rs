//! Tunables for the [`crate::HealthMonitor`].

use rust_decimal::Decimal;
use swarm_core::duration::DurationMs;

/// Thresholds and cadence for health sampling (spec §4.7).
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// How often to sample the watched process list.
    pub check_interval: DurationMs,
    /// No iteration advance for this long is flagged as stale.
    pub stale_after: DurationMs,
    /// Iteration count at/above this is flagged as a warning.
    pub iteration_warning: u32,
    /// Cumulative cost at/above this (on a new high) is flagged.
    pub cost_threshold: Decimal,
    /// Error count at/above this is flagged.
    pub error_threshold: u32,
    /// Bound on the alert channel; sends beyond this drop the newest
    /// alert rather than block the tick.
    pub alert_channel_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: DurationMs::from_secs(30),
            stale_after: DurationMs::from_secs(5 * 60),
            iteration_warning: 15,
            cost_threshold: Decimal::new(1, 0), // 1.00
            error_threshold: 3,
            alert_channel_capacity: 16,
        }
    }
}
