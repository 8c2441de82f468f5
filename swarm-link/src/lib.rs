#![deny(missing_docs)]
//! Bidirectional links, unidirectional monitors, and exit-signal propagation.
//!
//! This crate is the Erlang-ish relational layer underneath `swarm-process`:
//! it tracks *who is linked to whom* and *who is watching whom*, and it runs
//! the cascade algorithm when one side of a link dies. It does not own any
//! process — peers are referenced as `Weak<dyn ExitTarget>` so that the
//! process arena (owned by the orchestrator) is the only strong-owner, and
//! the link/monitor tables are pure lookup keys, never ownership, per the
//! "cyclic ownership" design note.
//!
//! Mutations that touch two peers (`link`/`unlink`, cascade propagation)
//! take a single write lock over the whole node table rather than locking
//! peers individually in id order — with one process arena per orchestrator
//! this does not contend enough to be worth sharding, and it sidesteps the
//! lock-ordering bookkeeping a two-peer-lock scheme would need. Following
//! `swarm-state-memory::MemoryStore`'s single `RwLock<HashMap<..>>` idiom.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use swarm_core::id::ProcessId;
use thiserror::Error;

/// Errors from link/monitor table operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LinkError {
    /// A process attempted to link to itself.
    #[error("process {0} cannot link to itself")]
    SelfLink(ProcessId),

    /// A process attempted to monitor itself.
    #[error("process {0} cannot monitor itself")]
    SelfMonitor(ProcessId),

    /// The referenced process is not registered in this link table.
    #[error("process not registered: {0}")]
    NotRegistered(ProcessId),
}

/// Why a process exited. Mirrors the spec's exit-signal reason enum exactly.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Graceful, successful completion. Never cascades to linked peers.
    Normal,
    /// Error termination. Cascades to linked peers that do not trap exits.
    Error,
    /// Forced kill (`Process::kill`). Cascades like `Error`.
    Killed,
    /// Synthetic reason applied to a peer that died because a link cascaded
    /// into it; never the *original* reason recorded by the dying process.
    Linked,
}

/// A record describing a process's termination, delivered along links and
/// monitors.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    /// Id of the process that exited.
    pub peer_id: ProcessId,
    /// Agent name of the process that exited, for display/logging.
    pub peer_agent_name: String,
    /// Why it exited.
    pub reason: ExitReason,
    /// Error message, present for `Error`/`Killed`/`Linked` reasons.
    pub error: Option<String>,
    /// The process's final result, present only for `Normal` exits.
    pub result: Option<serde_json::Value>,
    /// Wall-clock milliseconds since the Unix epoch when the signal was built.
    pub timestamp_ms: u64,
}

impl ExitSignal {
    /// Build a signal with the current wall-clock time.
    pub fn new(peer_id: ProcessId, peer_agent_name: impl Into<String>, reason: ExitReason) -> Self {
        Self {
            peer_id,
            peer_agent_name: peer_agent_name.into(),
            reason,
            error: None,
            result: None,
            timestamp_ms: now_ms(),
        }
    }

    /// Attach an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a result payload (only meaningful for `Normal` exits).
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Derive the signal a cascaded peer receives: same origin, reason
    /// forced to `Linked`, error wrapped to name the originating process.
    fn as_cascade(&self) -> Self {
        Self {
            peer_id: self.peer_id.clone(),
            peer_agent_name: self.peer_agent_name.clone(),
            reason: ExitReason::Linked,
            error: Some(match &self.error {
                Some(e) => format!("linked process {} died: {e}", self.peer_id),
                None => format!("linked process {} died", self.peer_id),
            }),
            result: None,
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A unique handle to an outgoing monitor: `(monotonic id, target id)`.
///
/// `demonitor` requires the exact ref to remove the outgoing entry — this
/// guards against removing a *new* monitor on a target id that was reused
/// after the originally-monitored process died.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorRef {
    /// Monotonically increasing id, unique per observer.
    pub seq: u64,
    /// The process id that was being watched when this ref was issued.
    pub target: ProcessId,
}

/// Object-safe facet of a process that the link graph can deliver signals to.
///
/// This is an interface abstraction, not inheritance: the link graph sees
/// only this small read/write facet of a process, never the process's full
/// state.
pub trait ExitTarget: Send + Sync {
    /// This process's id.
    fn id(&self) -> &ProcessId;

    /// This process's agent name (for signal display).
    fn agent_name(&self) -> &str;

    /// Whether this process currently traps exits.
    fn traps_exit(&self) -> bool;

    /// Deliver a signal onto this process's exit-signal channel.
    ///
    /// MUST be non-blocking; implementations drop the newest signal if the
    /// channel is full rather than stall the propagator.
    fn deliver_exit_signal(&self, signal: ExitSignal);

    /// Force this process to fail because a linked, non-trapping peer died.
    ///
    /// Implementations transition to `failed` (idempotently) and then call
    /// back into the shared `LinkRegistry` to propagate their own death —
    /// this is how a cascade reaches a third link in the chain.
    fn cascade_fail(&self, signal: ExitSignal);
}

struct Node {
    handle: Weak<dyn ExitTarget>,
    links: HashSet<ProcessId>,
    /// refs this process issued to watch other processes: ref seq -> target.
    monitors_out: HashMap<u64, ProcessId>,
    /// refs other processes issued to watch this one: (observer, ref seq).
    monitors_in: HashSet<(ProcessId, u64)>,
    next_ref: u64,
}

impl Node {
    fn new(handle: Weak<dyn ExitTarget>) -> Self {
        Self {
            handle,
            links: HashSet::new(),
            monitors_out: HashMap::new(),
            monitors_in: HashSet::new(),
            next_ref: 0,
        }
    }
}

/// The shared link/monitor table for one orchestrator's process arena.
///
/// One `LinkRegistry` is created per orchestrator and shared (via `Arc`)
/// across every process it spawns.
pub struct LinkRegistry {
    nodes: RwLock<HashMap<ProcessId, Node>>,
}

impl LinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a process so it can participate in links/monitors.
    ///
    /// Stores only a `Weak` handle — the registry never keeps a process
    /// alive.
    pub fn register(&self, id: ProcessId, handle: Weak<dyn ExitTarget>) {
        tracing::trace!(process_id = %id, "registering process in link graph");
        self.nodes.write().unwrap().insert(id, Node::new(handle));
    }

    /// Remove a process's node entirely. Used for final teardown after
    /// propagation has already run (propagation itself only empties the
    /// link/incoming-monitor sets, per P6 — it does not remove the node,
    /// since a late monitor() call against the now-dead id must still be
    /// able to observe "not registered" rather than panic).
    pub fn deregister(&self, id: &ProcessId) {
        self.nodes.write().unwrap().remove(id);
    }

    /// Create a bidirectional link between `a` and `b`. Idempotent; a no-op
    /// if `a == b` is rejected as `SelfLink` rather than silently ignored,
    /// so callers notice a bug instead of accidentally no-op'ing.
    pub fn link(&self, a: &ProcessId, b: &ProcessId) -> Result<(), LinkError> {
        if a == b {
            return Err(LinkError::SelfLink(a.clone()));
        }
        let mut nodes = self.nodes.write().unwrap();
        if !nodes.contains_key(a) {
            return Err(LinkError::NotRegistered(a.clone()));
        }
        if !nodes.contains_key(b) {
            return Err(LinkError::NotRegistered(b.clone()));
        }
        nodes.get_mut(a).unwrap().links.insert(b.clone());
        nodes.get_mut(b).unwrap().links.insert(a.clone());
        tracing::debug!(a = %a, b = %b, "linked");
        Ok(())
    }

    /// Remove a bidirectional link. Idempotent, symmetric.
    pub fn unlink(&self, a: &ProcessId, b: &ProcessId) {
        let mut nodes = self.nodes.write().unwrap();
        if let Some(node) = nodes.get_mut(a) {
            node.links.remove(b);
        }
        if let Some(node) = nodes.get_mut(b) {
            node.links.remove(a);
        }
    }

    /// Whether `a` and `b` are currently linked (test/introspection helper).
    pub fn linked(&self, a: &ProcessId, b: &ProcessId) -> bool {
        let nodes = self.nodes.read().unwrap();
        nodes.get(a).map(|n| n.links.contains(b)).unwrap_or(false)
    }

    /// All current link peers of `id`.
    pub fn links_of(&self, id: &ProcessId) -> Vec<ProcessId> {
        let nodes = self.nodes.read().unwrap();
        nodes
            .get(id)
            .map(|n| n.links.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Create a unidirectional monitor: `observer` watches `target`.
    ///
    /// Rejected when `observer == target`, mirroring `link`'s `SelfLink`
    /// guard — P1 requires a process never appear in its own link set *or*
    /// own monitor set.
    pub fn monitor(&self, observer: &ProcessId, target: &ProcessId) -> Result<MonitorRef, LinkError> {
        if observer == target {
            return Err(LinkError::SelfMonitor(observer.clone()));
        }
        let mut nodes = self.nodes.write().unwrap();
        if !nodes.contains_key(observer) {
            return Err(LinkError::NotRegistered(observer.clone()));
        }
        if !nodes.contains_key(target) {
            return Err(LinkError::NotRegistered(target.clone()));
        }
        let seq = {
            let obs = nodes.get_mut(observer).unwrap();
            let seq = obs.next_ref;
            obs.next_ref += 1;
            obs.monitors_out.insert(seq, target.clone());
            seq
        };
        nodes
            .get_mut(target)
            .unwrap()
            .monitors_in
            .insert((observer.clone(), seq));
        Ok(MonitorRef {
            seq,
            target: target.clone(),
        })
    }

    /// Remove a monitor. Only removes if the stored ref's target still
    /// matches — guards against demonitoring a replay after the original
    /// target died and a new process reused the observer's ref space.
    pub fn demonitor(&self, observer: &ProcessId, mref: &MonitorRef) {
        let mut nodes = self.nodes.write().unwrap();
        let removed_target = nodes.get_mut(observer).and_then(|obs| {
            match obs.monitors_out.get(&mref.seq) {
                Some(t) if *t == mref.target => obs.monitors_out.remove(&mref.seq),
                _ => None,
            }
        });
        if let Some(target) = removed_target {
            if let Some(tnode) = nodes.get_mut(&target) {
                tnode.monitors_in.remove(&(observer.clone(), mref.seq));
            }
        }
    }

    /// Run the exit-propagation algorithm for a process that just died.
    ///
    /// Snapshots links and incoming monitors, clears them on `dying`, then
    /// for each linked peer either delivers the signal (trap-exit) or
    /// cascades a failure (non-trapping, non-normal reason); monitors
    /// always receive the signal and never die from it.
    pub fn propagate(&self, dying: &ProcessId, signal: ExitSignal) {
        tracing::debug!(process_id = %dying, reason = ?signal.reason, "propagating exit signal");
        let (linked, monitoring): (Vec<Weak<dyn ExitTarget>>, Vec<Weak<dyn ExitTarget>>) = {
            let mut nodes = self.nodes.write().unwrap();

            let (links_snapshot, monitors_in_snapshot) = match nodes.get_mut(dying) {
                Some(node) => (
                    std::mem::take(&mut node.links),
                    std::mem::take(&mut node.monitors_in),
                ),
                None => (HashSet::new(), HashSet::new()),
            };

            let mut linked = Vec::with_capacity(links_snapshot.len());
            for peer_id in &links_snapshot {
                if let Some(peer) = nodes.get_mut(peer_id) {
                    peer.links.remove(dying);
                    linked.push(peer.handle.clone());
                }
            }

            let mut monitoring = Vec::with_capacity(monitors_in_snapshot.len());
            for (observer_id, seq) in &monitors_in_snapshot {
                if let Some(obs) = nodes.get_mut(observer_id) {
                    obs.monitors_out.remove(seq);
                    monitoring.push(obs.handle.clone());
                }
            }

            (linked, monitoring)
        };

        for handle in linked {
            let Some(handle) = handle.upgrade() else {
                continue;
            };
            if handle.traps_exit() {
                handle.deliver_exit_signal(signal.clone());
            } else if signal.reason != ExitReason::Normal {
                handle.cascade_fail(signal.as_cascade());
            }
        }

        for handle in monitoring {
            if let Some(handle) = handle.upgrade() {
                handle.deliver_exit_signal(signal.clone());
            }
        }
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}
