//! Registry errors (spec §4.5, §7).

use swarm_core::id::ProcessId;
use thiserror::Error;

/// Errors from registry operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `Spawn` was called with `agent.name == ""`, or `Register` with an
    /// empty name.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The registry is already at its configured process cap.
    #[error("max processes reached ({0})")]
    MaxProcessesReached(usize),

    /// `Register` was called with a name already bound to a different
    /// process. Registering the same process under its current name is
    /// idempotent and does not error.
    #[error("name already taken: {0}")]
    NameTaken(String),

    /// `Get`/`Kill`/`JoinGroup`/etc. referenced an id not in the process map.
    #[error("process not found: {0}")]
    ProcessNotFound(ProcessId),

    /// A name lookup found nothing bound.
    #[error("no process registered under name: {0}")]
    NameNotFound(String),

    /// `SpawnSupervised`'s restart path has no blueprint to restart from
    /// (the caller never registered one under this name).
    #[error("no registered agent blueprint: {0}")]
    AgentNotFound(String),

    /// The model's rate-limiter bank rejected this call.
    #[error("rate limit exceeded for model: {0}")]
    RateLimited(String),

    /// The persistence collaborator (`swarm_core::state::StateStore`)
    /// failed while saving or loading a [`crate::registry::ProcessSnapshot`]
    /// list.
    #[error("persistence error: {0}")]
    Persist(#[from] swarm_core::error::StateError),
}
