//! Process-level errors.

use swarm_core::id::ProcessId;
use swarm_provider::provider::ProviderError;
use thiserror::Error;

/// Errors produced while a process is running or while something tries
/// to interact with one.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process is not in a state that accepts `Send` (already
    /// completed, failed, or timed out).
    #[error("process {0} is not running")]
    NotRunning(ProcessId),

    /// The turn loop hit `Agent::max_iterations` without reaching a
    /// terminal (no-tool-calls) response.
    #[error("process {0} exceeded max iterations ({1})")]
    MaxIterationsExceeded(ProcessId, u32),

    /// Cumulative cost crossed `BudgetPolicy::max_cost` under
    /// `OverrunAction::Block`.
    #[error("process {0} exceeded its budget")]
    BudgetExceeded(ProcessId),

    /// The backend call failed after exhausting the retry policy.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Input handed to `Send` was malformed (e.g. not valid UTF-8 text
    /// the process can append to its history).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The call was cancelled via its `CancellationToken` before
    /// completing.
    #[error("process {0} was cancelled")]
    Cancelled(ProcessId),

    /// The call exceeded its deadline.
    #[error("process {0} timed out")]
    Timeout(ProcessId),

    /// `Agent::circuit_breaker`'s failure threshold was crossed and the
    /// cooldown window hasn't elapsed yet; the backend call was skipped.
    #[error("process {0} circuit breaker is open")]
    CircuitOpen(ProcessId),

    /// A linked peer died and this process does not trap exits, so it
    /// was forced into the failed state as a cascade.
    #[error("linked process {peer_id} ({peer_agent_name}) died: {error}")]
    LinkedProcess {
        /// Id of the peer that died.
        peer_id: ProcessId,
        /// Agent name of the peer that died, for readability in logs.
        peer_agent_name: String,
        /// The peer's own error message, if it failed with one.
        error: String,
    },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
