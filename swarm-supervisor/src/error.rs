//! Supervisor errors.

use thiserror::Error;

/// Errors from supervisor child management.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `StartChild` was called with a name already declared on this
    /// supervisor.
    #[error("child name already declared: {0}")]
    DuplicateChildName(String),

    /// A named child was not found among the supervisor's declared specs.
    #[error("child not found: {0}")]
    ChildNotFound(String),

    /// The supervisor has already given up (exceeded restart intensity)
    /// and refuses further child management.
    #[error("supervisor has given up and shut down")]
    GivenUp,

    /// A child's spawn function failed.
    #[error("failed to spawn child {0}: {1}")]
    SpawnFailed(String, String),
}
