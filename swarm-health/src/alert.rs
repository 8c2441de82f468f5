//! Alert records emitted by the [`crate::HealthMonitor`] (spec §4.7).

use rust_decimal::Decimal;
use swarm_core::id::ProcessId;

/// A health condition observed on one process during a tick.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// No iteration advance observed for longer than the configured
    /// staleness window.
    StaleProgress {
        /// The affected process.
        process_id: ProcessId,
        /// How long since the last observed progress.
        idle_for_ms: u64,
    },
    /// The process's iteration count crossed the configured warning
    /// threshold.
    HighIterationCount {
        /// The affected process.
        process_id: ProcessId,
        /// Current iteration count.
        iterations: u32,
    },
    /// Cumulative cost crossed the configured threshold, at a new high
    /// not previously alerted on.
    HighCost {
        /// The affected process.
        process_id: ProcessId,
        /// Current cumulative cost.
        cost: Decimal,
    },
    /// Consecutive/cumulative error count crossed the configured
    /// threshold.
    HighErrorCount {
        /// The affected process.
        process_id: ProcessId,
        /// Current error count.
        errors: u32,
    },
}

impl Alert {
    /// The process this alert concerns.
    pub fn process_id(&self) -> &ProcessId {
        match self {
            Alert::StaleProgress { process_id, .. } => process_id,
            Alert::HighIterationCount { process_id, .. } => process_id,
            Alert::HighCost { process_id, .. } => process_id,
            Alert::HighErrorCount { process_id, .. } => process_id,
        }
    }
}
