//! `Registry` — the orchestrator's process arena (spec §4.5).
//!
//! Owns the process map, the name index, the group map, a per-model
//! rate-limiter bank, and the shared [`LinkRegistry`]/[`HookRegistry`] every
//! spawned process is wired into. Grounded on `swarm-state-memory`'s
//! `RwLock<HashMap<..>>` storage idiom; rate limiting follows the same
//! per-model keying convention `swarm-provider` already uses for provider
//! config.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use swarm_core::duration::DurationMs;
use swarm_core::id::ProcessId;
use swarm_hooks::HookRegistry;
use swarm_link::LinkRegistry;
use swarm_process::agent::Agent;
use swarm_process::process::{Process, Status};
use swarm_provider::provider::Provider;
use swarm_supervisor::backoff::BackoffConfig;
use swarm_supervisor::intensity::{IntensityTracker, RestartIntensity};
use swarm_supervisor::restart::RestartClass;
use tokio::sync::Notify;

use crate::error::RegistryError;

/// Caps and defaults for one `Registry` instance.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Hard cap on concurrently tracked processes. `Spawn` rejects once
    /// reached.
    pub max_processes: usize,
    /// Fallback model used when an [`Agent`]'s own `model` is `None`.
    /// Left `None`, the agent's own backend default (see
    /// `ProviderRequest::model`'s doc) applies unchanged.
    pub default_model: Option<String>,
    /// How often the reaper task polls process status for terminal
    /// transitions (no native completion event exists on `Process`).
    pub reap_interval: DurationMs,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_processes: 10_000,
            default_model: None,
            reap_interval: DurationMs::from_millis(200),
        }
    }
}

/// Per-model sliding-window call budget, the registry's "rate-limiter bank"
/// (spec §4.5). Mirrors `swarm-supervisor::intensity::IntensityTracker`'s
/// sliding-window shape; kept separate since it counts calls per model
/// rather than restarts per supervisor and has no give-up behavior, only
/// rejection.
struct RateLimiter {
    max_per_minute: u32,
    calls: std::sync::Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            calls: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Record a call attempt now and report whether it's within budget.
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock().unwrap();
        while let Some(&front) = calls.front() {
            if now.duration_since(front) > Duration::from_secs(60) {
                calls.pop_front();
            } else {
                break;
            }
        }
        if calls.len() as u32 >= self.max_per_minute {
            false
        } else {
            calls.push_back(now);
            true
        }
    }
}

/// Give-up-after-N restart bookkeeping for one automatically-restarted
/// process, separate from the static, declared-up-front `Supervisor`
/// component (see DESIGN.md Open Question (a)).
struct Supervision {
    agent: Arc<Agent>,
    restart: RestartClass,
    intensity: Arc<IntensityTracker>,
    backoff: BackoffConfig,
}

/// The restart policy for an automatically-restarted process, threaded
/// through every respawn in its lineage unchanged.
///
/// `intensity` is the live, shared tracker: it MUST be the same instance
/// across every incarnation of the process so failures accumulate toward
/// one sliding window (spec P7), rather than a fresh, empty tracker being
/// built on every respawn (which would let the process restart forever —
/// each incarnation would only ever see its own single failure).
#[derive(Clone)]
pub struct RestartSpec {
    /// Restart class governing whether a given exit should respawn.
    pub class: RestartClass,
    /// Sliding-window restart-intensity tracker, shared across respawns.
    pub intensity: Arc<IntensityTracker>,
    /// Backoff schedule between restart attempts.
    pub backoff: BackoffConfig,
}

impl RestartSpec {
    /// Build a fresh restart lineage: a new tracker with no recorded
    /// failures yet, under `policy`.
    pub fn new(class: RestartClass, policy: RestartIntensity, backoff: BackoffConfig) -> Self {
        Self {
            class,
            intensity: Arc::new(IntensityTracker::new(policy)),
            backoff,
        }
    }
}

/// Lifecycle callback kinds fired by the registry's reaper (spec §5).
type StartedHook = Arc<dyn Fn(&ProcessId) + Send + Sync>;
type CompleteHook = Arc<dyn Fn(&ProcessId, &str) + Send + Sync>;
type FailedHook = Arc<dyn Fn(&ProcessId, &str) + Send + Sync>;

/// A point-in-time, serializable record of one process (spec §6's
/// persistence interface: `{id, agent name, task, work-dir, status, start
/// time, metrics}`). This port has no file-system "task"/"work-dir"
/// concept — agents converse rather than run shell tasks in a directory —
/// so those two fields are dropped; everything else carries over.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProcessSnapshot {
    /// The process's id.
    pub id: ProcessId,
    /// The blueprint's name (`Agent::name`), not the process's own
    /// registered display name.
    pub agent_name: String,
    /// Lifecycle status at snapshot time.
    pub status: Status,
    /// Milliseconds since the Unix epoch when the process was spawned.
    pub started_at_epoch_ms: u64,
    /// Metrics at snapshot time.
    pub metrics: swarm_process::process::Metrics,
}

const SNAPSHOT_SCOPE_KEY: &str = "swarm-orchestrator/process-snapshots";

/// Options accepted by [`Registry::spawn`].
#[derive(Default)]
pub struct SpawnOptions {
    /// Register the process under this display name immediately on spawn.
    pub name: Option<String>,
    /// Groups to join immediately on spawn.
    pub groups: Vec<String>,
    /// If set, the process is tracked for automatic restart on failure
    /// under this class/backoff, independent of a declared `Supervisor`.
    pub restart: Option<RestartSpec>,
}

struct Entry<P: Provider> {
    process: Arc<Process<P>>,
    supervision: Option<Supervision>,
}

/// The orchestrator's process arena: owns every live [`Process`], their
/// name/group indices, and the ambient services (links, hooks, health,
/// rate limits) they're spawned with.
///
/// Generic over one concrete `P: Provider` — `Provider` uses RPITIT and is
/// not object-safe (see `swarm-provider::provider`), so a single
/// orchestrator instance serves exactly one backend. `Agent::model` still
/// selects *which model* that backend is asked to use per process.
pub struct Registry<P: Provider + 'static> {
    config: RegistryConfig,
    provider: Arc<P>,
    hooks: Arc<HookRegistry>,
    links: Arc<LinkRegistry>,
    health: Arc<swarm_health::HealthMonitor<P>>,
    processes: RwLock<HashMap<ProcessId, Entry<P>>>,
    names: RwLock<HashMap<String, ProcessId>>,
    groups: RwLock<HashMap<String, HashSet<ProcessId>>>,
    rate_limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    on_started: RwLock<Vec<StartedHook>>,
    on_complete: RwLock<Vec<CompleteHook>>,
    on_failed: RwLock<Vec<FailedHook>>,
    shutdown: Arc<Notify>,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl<P: Provider + 'static> Registry<P> {
    /// Build a registry around a single backend, with a fresh link table
    /// and hook registry.
    pub fn new(
        config: RegistryConfig,
        provider: Arc<P>,
        hooks: Arc<HookRegistry>,
        health_config: swarm_health::HealthConfig,
    ) -> (Arc<Self>, tokio::sync::mpsc::Receiver<swarm_health::Alert>) {
        let (health, alerts) = swarm_health::HealthMonitor::new(health_config);
        let registry = Arc::new(Self {
            config,
            provider,
            hooks,
            links: Arc::new(LinkRegistry::new()),
            health,
            processes: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            rate_limiters: RwLock::new(HashMap::new()),
            on_started: RwLock::new(Vec::new()),
            on_complete: RwLock::new(Vec::new()),
            on_failed: RwLock::new(Vec::new()),
            shutdown: Arc::new(Notify::new()),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        });
        registry.health.start();
        registry.clone().spawn_reaper();
        (registry, alerts)
    }

    /// Register a callback fired once a process is spawned and inserted
    /// into the map.
    pub fn on_started(&self, f: impl Fn(&ProcessId) + Send + Sync + 'static) {
        self.on_started.write().unwrap().push(Arc::new(f));
    }

    /// Register a callback fired after a process completes normally,
    /// before its name/group entries are cleared.
    pub fn on_complete(&self, f: impl Fn(&ProcessId, &str) + Send + Sync + 'static) {
        self.on_complete.write().unwrap().push(Arc::new(f));
    }

    /// Register a callback fired after a process fails (including kills
    /// and cascaded link failures), before its name/group entries are
    /// cleared.
    pub fn on_failed(&self, f: impl Fn(&ProcessId, &str) + Send + Sync + 'static) {
        self.on_failed.write().unwrap().push(Arc::new(f));
    }

    fn rate_limiter_for(&self, model: &str, max_per_minute: u32) -> Arc<RateLimiter> {
        if let Some(existing) = self.rate_limiters.read().unwrap().get(model) {
            return existing.clone();
        }
        let mut limiters = self.rate_limiters.write().unwrap();
        limiters
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(max_per_minute)))
            .clone()
    }

    /// Resolve the model an agent should run with: its own, else the
    /// registry default, else whatever the backend itself defaults to.
    fn resolve_agent(&self, agent: &Agent) -> Agent {
        let mut resolved = agent.clone();
        if resolved.model.is_none() {
            resolved.model = self.config.default_model.clone();
        }
        resolved
    }

    /// Spawn a process from an agent blueprint (spec §4.5's `Spawn`).
    ///
    /// Rejects an empty `agent.name`, rejects once at `max_processes`,
    /// consults the per-model rate-limiter bank if the agent carries a
    /// [`swarm_process::agent::RateLimitConfig`], resolves the backend
    /// model, inserts the process, applies `options`, fires `OnStarted`,
    /// and returns the handle.
    pub fn spawn(
        self: &Arc<Self>,
        agent: Agent,
        options: SpawnOptions,
    ) -> Result<Arc<Process<P>>, RegistryError> {
        if agent.name.trim().is_empty() {
            return Err(RegistryError::InvalidInput("agent.name must not be empty".into()));
        }
        if self.processes.read().unwrap().len() >= self.config.max_processes {
            return Err(RegistryError::MaxProcessesReached(self.config.max_processes));
        }

        let resolved = self.resolve_agent(&agent);
        if let (Some(model), Some(limit)) = (&resolved.model, resolved.rate_limit) {
            let limiter = self.rate_limiter_for(model, limit.max_per_minute);
            if !limiter.try_acquire() {
                return Err(RegistryError::RateLimited(model.clone()));
            }
        }

        let id = ProcessId::new(uuid::Uuid::new_v4().to_string());
        let resolved = Arc::new(resolved);
        let process = Process::spawn(
            id.clone(),
            resolved.clone(),
            self.provider.clone(),
            self.hooks.clone(),
            self.links.clone(),
        );

        if let Some(name) = &options.name {
            process.set_name(name.clone());
        }

        let supervision = options.restart.map(|spec| Supervision {
            agent: resolved.clone(),
            restart: spec.class,
            intensity: spec.intensity,
            backoff: spec.backoff,
        });

        self.processes.write().unwrap().insert(
            id.clone(),
            Entry {
                process: process.clone(),
                supervision,
            },
        );

        if let Some(name) = &options.name {
            self.names.write().unwrap().insert(name.clone(), id.clone());
        }
        for group in &options.groups {
            self.groups
                .write()
                .unwrap()
                .entry(group.clone())
                .or_default()
                .insert(id.clone());
        }

        self.health.register(process.clone());

        for cb in self.on_started.read().unwrap().iter() {
            cb(&id);
        }

        tracing::info!(process_id = %id, agent = %process.name().unwrap_or_default(), "process spawned");
        Ok(process)
    }

    /// Look up a live process by id.
    pub fn get(&self, id: &ProcessId) -> Result<Arc<Process<P>>, RegistryError> {
        self.processes
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.process.clone())
            .ok_or_else(|| RegistryError::ProcessNotFound(id.clone()))
    }

    /// Look up a live process by its registered name.
    pub fn get_by_name(&self, name: &str) -> Result<Arc<Process<P>>, RegistryError> {
        let id = self
            .names
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NameNotFound(name.to_string()))?;
        self.get(&id)
    }

    /// Every currently tracked process.
    pub fn list(&self) -> Vec<Arc<Process<P>>> {
        self.processes
            .read()
            .unwrap()
            .values()
            .map(|e| e.process.clone())
            .collect()
    }

    /// Every process currently a member of `group`.
    pub fn list_group(&self, group: &str) -> Vec<Arc<Process<P>>> {
        let ids = match self.groups.read().unwrap().get(group) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let processes = self.processes.read().unwrap();
        ids.iter()
            .filter_map(|id| processes.get(id).map(|e| e.process.clone()))
            .collect()
    }

    /// Forcibly terminate a process.
    pub fn kill(&self, id: &ProcessId) -> Result<(), RegistryError> {
        let process = self.get(id)?;
        process.kill();
        Ok(())
    }

    /// Bind `name` to `process_id`. Idempotent if `name` already points at
    /// `process_id`; errors if it points at a different, still-live
    /// process.
    pub fn register(&self, name: impl Into<String>, process_id: ProcessId) -> Result<(), RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidInput("name must not be empty".into()));
        }
        if !self.processes.read().unwrap().contains_key(&process_id) {
            return Err(RegistryError::ProcessNotFound(process_id));
        }
        let mut names = self.names.write().unwrap();
        if let Some(existing) = names.get(&name) {
            if existing != &process_id {
                return Err(RegistryError::NameTaken(name));
            }
            return Ok(());
        }
        if let Ok(process) = self.get(&process_id) {
            process.set_name(name.clone());
        }
        names.insert(name, process_id);
        Ok(())
    }

    /// Add `process_id` to `group`. Group lifetime is registry-scoped: it
    /// is cleared automatically once the process terminates.
    pub fn join_group(&self, group: impl Into<String>, process_id: ProcessId) -> Result<(), RegistryError> {
        if !self.processes.read().unwrap().contains_key(&process_id) {
            return Err(RegistryError::ProcessNotFound(process_id));
        }
        self.groups
            .write()
            .unwrap()
            .entry(group.into())
            .or_default()
            .insert(process_id);
        Ok(())
    }

    /// Remove `process_id` from `group`, if present. Never errors on an
    /// absent membership.
    pub fn leave_group(&self, group: &str, process_id: &ProcessId) {
        if let Some(members) = self.groups.write().unwrap().get_mut(group) {
            members.remove(process_id);
        }
    }

    fn clear_membership(&self, id: &ProcessId) {
        self.names.write().unwrap().retain(|_, v| *v != *id);
        let mut groups = self.groups.write().unwrap();
        for members in groups.values_mut() {
            members.remove(id);
        }
        groups.retain(|_, members| !members.is_empty());
    }

    /// Spawn the background task that polls for terminal status
    /// transitions. `Process` has no native completion event, so this is
    /// the same poll-and-react shape `HealthMonitor::tick` already uses.
    fn spawn_reaper(self: Arc<Self>) {
        let interval = self.config.reap_interval.to_std();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.shutdown.notified() => {
                        if self.shutting_down.load(std::sync::atomic::Ordering::SeqCst) {
                            break;
                        }
                    }
                }
                self.reap_once().await;
                if self.shutting_down.load(std::sync::atomic::Ordering::SeqCst)
                    && self.processes.read().unwrap().is_empty()
                {
                    break;
                }
            }
        });
    }

    async fn reap_once(self: &Arc<Self>) {
        let terminal: Vec<(ProcessId, Arc<Process<P>>, Status)> = {
            let processes = self.processes.read().unwrap();
            processes
                .values()
                .filter_map(|e| {
                    let status = e.process.status();
                    matches!(status, Status::Completed | Status::Failed | Status::Timeout)
                        .then(|| (e.process.id().clone(), e.process.clone(), status))
                })
                .collect()
        };

        for (id, process, status) in terminal {
            let message = process
                .last_result()
                .or_else(|| process.metrics().last_error)
                .unwrap_or_default();

            match status {
                Status::Completed => {
                    let callbacks: Vec<_> = self.on_complete.read().unwrap().clone();
                    let calls = callbacks.into_iter().map(|cb| {
                        let id = id.clone();
                        let message = message.clone();
                        async move { cb(&id, &message) }
                    });
                    futures_util::future::join_all(calls).await;
                }
                Status::Failed | Status::Timeout => {
                    let callbacks: Vec<_> = self.on_failed.read().unwrap().clone();
                    let calls = callbacks.into_iter().map(|cb| {
                        let id = id.clone();
                        let message = message.clone();
                        async move { cb(&id, &message) }
                    });
                    futures_util::future::join_all(calls).await;
                }
                Status::Pending | Status::Running => unreachable!("filtered to terminal above"),
            }

            // Capture name/group membership before `clear_membership` erases
            // it — `maybe_respawn` needs it to re-register the lineage's
            // name under its replacement, per spec §4.5.
            let name = self
                .names
                .read()
                .unwrap()
                .iter()
                .find(|(_, v)| **v == id)
                .map(|(name, _)| name.clone());
            let groups: Vec<String> = self
                .groups
                .read()
                .unwrap()
                .iter()
                .filter(|(_, members)| members.contains(&id))
                .map(|(g, _)| g.clone())
                .collect();

            self.clear_membership(&id);
            self.health.deregister(&id);

            let respawn = if status != Status::Completed {
                self.maybe_respawn(&id, name, groups).await
            } else {
                None
            };

            self.processes.write().unwrap().remove(&id);
            self.links.deregister(&id);

            if let Some((agent, options)) = respawn {
                if let Err(err) = self.spawn(agent, options) {
                    tracing::warn!(process_id = %id, error = %err, "automatic restart failed");
                }
            }
        }
    }

    /// Consult the dying process's [`Supervision`] record, if any, and
    /// decide whether to respawn it. Exceeding the intensity window gives
    /// up permanently for that record (spec P7).
    async fn maybe_respawn(
        &self,
        id: &ProcessId,
        name: Option<String>,
        groups: Vec<String>,
    ) -> Option<(Agent, SpawnOptions)> {
        let (agent, restart, backoff, intensity, attempt) = {
            let processes = self.processes.read().unwrap();
            let entry = processes.get(id)?;
            let supervision = entry.supervision.as_ref()?;
            if !supervision.restart.should_restart(false) {
                return None;
            }
            if !supervision.intensity.record_and_check() {
                tracing::warn!(process_id = %id, "restart intensity exceeded, giving up");
                return None;
            }
            (
                (*supervision.agent).clone(),
                supervision.restart,
                supervision.backoff,
                supervision.intensity.clone(),
                supervision.intensity.current_count(),
            )
        };

        let delay = backoff.delay_for_attempt(attempt);
        if delay.as_millis() > 0 {
            tokio::time::sleep(delay.to_std()).await;
        }

        Some((
            agent,
            SpawnOptions {
                name,
                groups,
                restart: Some(RestartSpec {
                    class: restart,
                    intensity,
                    backoff,
                }),
            },
        ))
    }

    /// Stop the health monitor and cancel every live process, then wait
    /// for them to finish or `timeout` to elapse, whichever comes first.
    /// This is the cascading-cancellation path spec §4.5 describes as
    /// "cancel the root context" — this port has no single root context
    /// to cancel, since each `Process` owns its own token, so `Shutdown`
    /// walks the map and kills each one directly, which cascades through
    /// links/monitors the same way.
    pub async fn shutdown(self: &Arc<Self>, timeout: DurationMs) {
        self.shutting_down.store(true, std::sync::atomic::Ordering::SeqCst);
        self.health.stop();

        let processes = self.list();
        for process in &processes {
            process.kill();
        }
        self.shutdown.notify_waiters();

        let deadline = Instant::now() + timeout.to_std();
        loop {
            self.reap_once().await;
            if self.processes.read().unwrap().is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tracing::info!("registry shutdown complete");
    }

    /// Snapshot every currently tracked process (spec §6's persistence
    /// interface, the `save`/`load` half that lives in this crate: building
    /// the `process-state-list`). Callers persist the result themselves via
    /// [`Registry::persist`] or their own `StateStore`.
    pub fn snapshot_all(&self) -> Vec<ProcessSnapshot> {
        self.processes
            .read()
            .unwrap()
            .values()
            .map(|e| ProcessSnapshot {
                id: e.process.id().clone(),
                agent_name: e.process.agent().name.clone(),
                status: e.process.status(),
                started_at_epoch_ms: e.process.started_at_epoch_ms(),
                metrics: e.process.metrics(),
            })
            .collect()
    }

    /// Persist a snapshot of every live process to `store` (spec §6's
    /// `save(process-state-list)`).
    pub async fn persist(
        &self,
        store: &dyn swarm_core::state::StateStore,
    ) -> Result<(), RegistryError> {
        let snapshots = self.snapshot_all();
        let value = serde_json::to_value(&snapshots)
            .map_err(|err| swarm_core::error::StateError::Serialization(err.to_string()))?;
        store
            .write(&swarm_core::effect::Scope::Global, SNAPSHOT_SCOPE_KEY, value)
            .await?;
        Ok(())
    }

    /// Load the most recently persisted snapshot list (spec §6's `load()
    /// -> process-state-list`). Returns an empty vec if nothing was ever
    /// persisted.
    pub async fn load_snapshots(
        store: &dyn swarm_core::state::StateStore,
    ) -> Result<Vec<ProcessSnapshot>, RegistryError> {
        let value = store
            .read(&swarm_core::effect::Scope::Global, SNAPSHOT_SCOPE_KEY)
            .await?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        serde_json::from_value(value)
            .map_err(|err| swarm_core::error::StateError::Serialization(err.to_string()).into())
    }

    /// Load persisted snapshots and classify every one that was
    /// `Running`/`Pending` at save time as a restart candidate, rather than
    /// silently dropping it or guessing at its `Agent` blueprint — "the
    /// core does not by itself resume in-flight turns" (spec §6). The
    /// caller, who alone holds the blueprint registry, re-spawns whichever
    /// candidates it recognizes by `agent_name`.
    pub async fn recover(
        store: &dyn swarm_core::state::StateStore,
    ) -> Result<Vec<ProcessSnapshot>, RegistryError> {
        let snapshots = Self::load_snapshots(store).await?;
        Ok(Self::restart_candidates(snapshots))
    }

    /// Filter a snapshot list down to the ones left mid-flight (neither
    /// completed nor failed) when they were saved.
    pub fn restart_candidates(snapshots: Vec<ProcessSnapshot>) -> Vec<ProcessSnapshot> {
        snapshots
            .into_iter()
            .filter(|s| matches!(s.status, Status::Running | Status::Pending))
            .collect()
    }
}
