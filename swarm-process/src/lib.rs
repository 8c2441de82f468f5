#![deny(missing_docs)]
//! Agent processes for swarm: blueprints (`agent`) and the running process
//! state machine (`process`) that couples one blueprint to a
//! `swarm_provider::provider::Provider` backend and a `swarm_tool::ToolRegistry`.
//!
//! `process::Process` is the object this crate builds everything else
//! around: a single-owner, restartable unit of conversation with its own
//! lifecycle (`process::Status`), retry/circuit-breaker policy, and exit
//! signal on termination, tracked by `swarm-link`/`swarm-supervisor`/
//! `swarm-orchestrator` rather than bound to `swarm_core::turn::Turn`'s
//! stateless per-call dispatch contract.

pub mod agent;
pub mod error;
pub mod process;
mod wire;
