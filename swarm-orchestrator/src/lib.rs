#![deny(missing_docs)]
//! In-process orchestrator: turn dispatch plus the process arena that owns
//! agent lifecycles.
//!
//! [`LocalOrch`] implements `swarm_core`'s `Orchestrator` trait, dispatching
//! to registered agents via `HashMap<AgentId, Arc<dyn Turn>>`. Concurrent
//! dispatch uses `tokio::spawn`. No durability — turns that fail are not
//! retried and state is not persisted. Signal and query are no-ops.
//!
//! [`registry::Registry`] is the separate, lower-level process-owning
//! component (spec §4.5): it spawns, names, groups, and automatically
//! restarts [`swarm_process::process::Process`] instances, independent of
//! `LocalOrch`'s turn-dispatch responsibility (see DESIGN.md's Open
//! Question on the split between the two).

pub mod error;
pub mod registry;

pub use error::RegistryError;
pub use registry::{ProcessSnapshot, Registry, RegistryConfig, RestartSpec, SpawnOptions};

use async_trait::async_trait;
use swarm_core::effect::SignalPayload;
use swarm_core::error::OrchError;
use swarm_core::id::{AgentId, WorkflowId};
use swarm_core::turn::{Turn, TurnInput, TurnOutput};
use swarm_core::orchestrator::{Orchestrator, QueryPayload};
use std::collections::HashMap;
use std::sync::Arc;

/// In-process orchestrator that dispatches to registered agents.
///
/// Uses `Arc<dyn Turn>` for true concurrent dispatch via `tokio::spawn`.
/// No durability, no workflow tracking. Suitable for development,
/// testing, and single-process deployments.
pub struct LocalOrch {
    agents: HashMap<String, Arc<dyn Turn>>,
}

impl LocalOrch {
    /// Create a new empty orchestrator.
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent with the orchestrator.
    pub fn register(&mut self, id: AgentId, op: Arc<dyn Turn>) {
        self.agents.insert(id.to_string(), op);
    }
}

impl Default for LocalOrch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for LocalOrch {
    async fn dispatch(
        &self,
        agent: &AgentId,
        input: TurnInput,
    ) -> Result<TurnOutput, OrchError> {
        let op = self
            .agents
            .get(agent.as_str())
            .ok_or_else(|| OrchError::AgentNotFound(agent.to_string()))?;
        op.execute(input).await.map_err(OrchError::TurnError)
    }

    async fn dispatch_many(
        &self,
        tasks: Vec<(AgentId, TurnInput)>,
    ) -> Vec<Result<TurnOutput, OrchError>> {
        let mut handles = Vec::with_capacity(tasks.len());

        for (agent_id, input) in tasks {
            match self.agents.get(agent_id.as_str()) {
                Some(op) => {
                    let op = Arc::clone(op);
                    handles.push(tokio::spawn(async move {
                        op.execute(input)
                            .await
                            .map_err(OrchError::TurnError)
                    }));
                }
                None => {
                    let name = agent_id.to_string();
                    handles.push(tokio::spawn(async move {
                        Err(OrchError::AgentNotFound(name))
                    }));
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(Err(OrchError::DispatchFailed(e.to_string()))),
            }
        }

        results
    }

    async fn signal(
        &self,
        _target: &WorkflowId,
        _signal: SignalPayload,
    ) -> Result<(), OrchError> {
        // LocalOrch doesn't track running workflows — accept and discard.
        Ok(())
    }

    async fn query(
        &self,
        _target: &WorkflowId,
        _query: QueryPayload,
    ) -> Result<serde_json::Value, OrchError> {
        // LocalOrch doesn't track running workflows — return null.
        Ok(serde_json::Value::Null)
    }
}
