#![deny(missing_docs)]
//! # swarm — umbrella crate
//!
//! A single import surface for the fault-tolerant agent-orchestration
//! runtime: agent blueprints and their running `Process` instances
//! (`swarm-process`), Erlang-style links/monitors/trap-exit
//! (`swarm-link`), supervision trees (`swarm-supervisor`), the process
//! registry (`swarm-orchestrator`), and periodic health monitoring
//! (`swarm-health`) — all built on the `swarm_core` protocol traits.
//!
//! Each constituent crate is gated behind a feature so a caller that only
//! needs, say, the supervisor can avoid pulling in the agent loop.

#[cfg(feature = "core")]
pub use swarm_core;
#[cfg(feature = "core")]
pub use swarm_context;
#[cfg(feature = "hooks")]
pub use swarm_hooks;
#[cfg(feature = "core")]
pub use swarm_tool;
#[cfg(feature = "core")]
pub use swarm_provider;
#[cfg(feature = "process")]
pub use swarm_process;
#[cfg(feature = "link")]
pub use swarm_link;
#[cfg(feature = "supervisor")]
pub use swarm_supervisor;
#[cfg(feature = "orchestrator")]
pub use swarm_orchestrator;
#[cfg(feature = "health")]
pub use swarm_health;
#[cfg(feature = "state-memory")]
pub use swarm_state_memory;

/// Happy-path imports for composing a Swarm runtime.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use swarm_core::{
        AgentId, Content, ContentBlock, EnvError, Environment, HookError, OrchError, ProcessId,
        Scope, SessionId, StateError, StateReader, StateStore, Turn, TurnConfig, TurnError,
        TurnInput, TurnMetadata, TurnOutput, WorkflowId,
    };

    #[cfg(feature = "hooks")]
    pub use swarm_hooks::HookRegistry;

    #[cfg(feature = "core")]
    pub use swarm_tool::{ToolDyn, ToolError, ToolRegistry};

    #[cfg(feature = "core")]
    pub use swarm_provider::provider::{Provider, ProviderError};

    #[cfg(feature = "core")]
    pub use swarm_context::SlidingWindow;

    #[cfg(feature = "process")]
    pub use swarm_process::agent::{Agent, AllowedTools, BudgetPolicy, RetryPolicy, SystemPrompt};
    #[cfg(feature = "process")]
    pub use swarm_process::process::{Metrics, Process, Status, StreamEvent};
    #[cfg(feature = "process")]
    pub use swarm_process::error::ProcessError;

    #[cfg(feature = "link")]
    pub use swarm_link::{ExitReason, ExitSignal, ExitTarget, LinkError, LinkRegistry, MonitorRef};

    #[cfg(feature = "supervisor")]
    pub use swarm_supervisor::{
        BackoffConfig, ChildSpec, RestartClass, RestartIntensity, Strategy, Supervisor,
        SupervisorError,
    };

    #[cfg(feature = "orchestrator")]
    pub use swarm_orchestrator::{
        LocalOrch, ProcessSnapshot, Registry, RegistryConfig, RegistryError, RestartSpec,
        SpawnOptions,
    };

    #[cfg(feature = "health")]
    pub use swarm_health::{Alert, HealthConfig, HealthMonitor};

    #[cfg(feature = "state-memory")]
    pub use swarm_state_memory::MemoryStore;
}
