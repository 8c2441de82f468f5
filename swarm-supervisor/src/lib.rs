#![deny(missing_docs)]
//! Supervision trees for swarm: child specs, restart strategies, restart
//! intensity, and backoff (spec §4.4).
//!
//! This crate is deliberately decoupled from `swarm-process`'s concrete
//! `Agent`/`Process` types — a [`Supervisor`] only knows how to spawn a
//! child via a caller-supplied closure and how to poll a
//! [`SupervisedHandle`] for its terminal outcome. `swarm-orchestrator`
//! is where `ChildSpec::spawn` closures that actually build a
//! `swarm_process::Process` live, wrapped to satisfy `SupervisedHandle`.
//!
//! Each live child is watched by its own background `tokio` task that
//! polls [`SupervisedHandle::exit_outcome`] every 100ms (spec §4.4's
//! "Implementation MAY instead receive from a per-child exit channel;
//! polling is a valid fallback"). A per-slot generation counter lets a
//! stale poller recognize it has been superseded by a respawn and retire
//! quietly, rather than double-handling an exit.

pub mod backoff;
pub mod error;
pub mod intensity;
pub mod restart;

pub use backoff::{BackoffConfig, BackoffKind};
pub use error::SupervisorError;
pub use intensity::{IntensityTracker, RestartIntensity};
pub use restart::{RestartClass, Strategy};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use swarm_core::id::ProcessId;
use tokio::sync::Notify;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Object-safe facet a supervisor needs from a live child: its id, its
/// terminal outcome once it has one, and a way to force it down.
///
/// This is the same "interface abstraction, not inheritance" shape as
/// `swarm_link::ExitTarget` — a supervisor sees only this small read/write
/// facet, never the concrete process type.
pub trait SupervisedHandle: Send + Sync {
    /// This child's process id, for display/logging.
    fn id(&self) -> &ProcessId;

    /// `None` while the child is still running. Once terminated,
    /// `Some(true)` for a normal exit, `Some(false)` for any abnormal one
    /// (error, kill, or a cascaded link failure).
    fn exit_outcome(&self) -> Option<bool>;

    /// Force this child down. Used for `TerminateChild`, `RestartChild`,
    /// `DeleteChild`, and when a sibling restart tears down this child
    /// under `one-for-all`/`rest-for-one`.
    fn stop(&self);
}

/// A factory that spawns one child and hands back its supervised handle.
pub type SpawnFn =
    Arc<dyn Fn() -> Result<Arc<dyn SupervisedHandle>, SupervisorError> + Send + Sync>;

/// A declared child: a registered name, its restart class, and how to
/// spawn it (spec §4.4's "child spec").
pub struct ChildSpec {
    /// Name this child is registered under; unique within one supervisor.
    pub name: String,
    /// Restart class governing whether this child is respawned.
    pub restart: RestartClass,
    /// Spawns a fresh instance of this child.
    pub spawn: SpawnFn,
}

impl ChildSpec {
    /// Build a child spec from its name, restart class, and spawn closure.
    pub fn new(
        name: impl Into<String>,
        restart: RestartClass,
        spawn: impl Fn() -> Result<Arc<dyn SupervisedHandle>, SupervisorError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            restart,
            spawn: Arc::new(spawn),
        }
    }
}

struct ChildRecord {
    spec: ChildSpec,
    live: Option<Arc<dyn SupervisedHandle>>,
    /// Bumped on every (re)spawn so a stale poller can recognize it has
    /// been superseded and retire instead of double-handling an exit.
    generation: u64,
}

/// A supervisor owning an ordered child list, per spec §4.4.
///
/// Construct with [`Supervisor::new`], then call [`Supervisor::start`] to
/// spawn the declared children in order and attach their monitors.
pub struct Supervisor {
    strategy: Strategy,
    backoff: BackoffConfig,
    intensity: IntensityTracker,
    children: RwLock<Vec<ChildRecord>>,
    given_up: AtomicBool,
    on_give_up: RwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
    shutdown: Notify,
}

impl Supervisor {
    /// Build a supervisor with its declared children, not yet started.
    pub fn new(
        strategy: Strategy,
        intensity: RestartIntensity,
        backoff: BackoffConfig,
        specs: Vec<ChildSpec>,
    ) -> Arc<Self> {
        let children = specs
            .into_iter()
            .map(|spec| ChildRecord {
                spec,
                live: None,
                generation: 0,
            })
            .collect();
        Arc::new(Self {
            strategy,
            backoff,
            intensity: IntensityTracker::new(intensity),
            children: RwLock::new(children),
            given_up: AtomicBool::new(false),
            on_give_up: RwLock::new(None),
            shutdown: Notify::new(),
        })
    }

    /// Register a callback invoked once, from inside `give_up`, when this
    /// supervisor exceeds its restart intensity and shuts itself down.
    pub fn on_give_up(&self, cb: impl Fn() + Send + Sync + 'static) {
        *self.on_give_up.write().unwrap() = Some(Arc::new(cb));
    }

    /// Whether this supervisor has already given up.
    pub fn has_given_up(&self) -> bool {
        self.given_up.load(Ordering::SeqCst)
    }

    /// Names of every child still declared on this supervisor. Empty
    /// after `has_given_up()` (spec S7: "its Children() is empty").
    pub fn children(&self) -> Vec<String> {
        self.children
            .read()
            .unwrap()
            .iter()
            .map(|c| c.spec.name.clone())
            .collect()
    }

    /// The live handle for a named child, if it is currently running.
    pub fn live_child(&self, name: &str) -> Option<Arc<dyn SupervisedHandle>> {
        self.children
            .read()
            .unwrap()
            .iter()
            .find(|c| c.spec.name == name)
            .and_then(|c| c.live.clone())
    }

    /// Spawn every declared child in order and attach its monitor.
    pub fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let len = self.children.read().unwrap().len();
        for idx in 0..len {
            self.spawn_at(idx)?;
        }
        Ok(())
    }

    fn spawn_at(self: &Arc<Self>, idx: usize) -> Result<(), SupervisorError> {
        let (name, spawn, generation) = {
            let mut children = self.children.write().unwrap();
            let record = children
                .get_mut(idx)
                .ok_or_else(|| SupervisorError::ChildNotFound(format!("index {idx}")))?;
            let handle = (record.spec.spawn)()?;
            record.generation += 1;
            record.live = Some(handle);
            (record.spec.name.clone(), true, record.generation)
        };
        let _ = spawn;
        self.watch(name, generation);
        Ok(())
    }

    fn watch(self: &Arc<Self>, name: String, generation: u64) {
        let sup = self.clone();
        tokio::spawn(async move {
            loop {
                if sup.given_up.load(Ordering::SeqCst) {
                    return;
                }
                let outcome = {
                    let children = sup.children.read().unwrap();
                    match children.iter().find(|c| c.spec.name == name) {
                        Some(record) if record.generation == generation => {
                            record.live.as_ref().and_then(|h| h.exit_outcome())
                        }
                        _ => return, // superseded or deleted: retire quietly
                    }
                };
                if let Some(normal) = outcome {
                    sup.on_child_exit(name, normal).await;
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = sup.shutdown.notified() => return,
                }
            }
        });
    }

    async fn on_child_exit(self: &Arc<Self>, name: String, normal: bool) {
        if self.given_up.load(Ordering::SeqCst) {
            return;
        }
        let restart = {
            let mut children = self.children.write().unwrap();
            let Some(record) = children.iter_mut().find(|c| c.spec.name == name) else {
                return;
            };
            record.live = None;
            record.spec.restart
        };
        if !restart.should_restart(normal) {
            tracing::debug!(child = %name, normal, "child exited, restart class forbids respawn");
            return;
        }

        if !self.intensity.record_and_check() {
            tracing::warn!(child = %name, "restart intensity exceeded, supervisor giving up");
            self.give_up();
            return;
        }

        let attempt = self.intensity.current_count();
        let delay = self.backoff.delay_for_attempt(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay.to_std()) => {}
            _ = self.shutdown.notified() => return,
        }
        if self.given_up.load(Ordering::SeqCst) {
            return;
        }

        match self.strategy {
            Strategy::OneForOne => self.respawn_one(&name),
            Strategy::OneForAll => self.respawn_all(),
            Strategy::RestForOne => self.respawn_rest_from(&name),
        }
    }

    fn respawn_one(self: &Arc<Self>, name: &str) {
        let idx = {
            let children = self.children.read().unwrap();
            children.iter().position(|c| c.spec.name == name)
        };
        if let Some(idx) = idx {
            if let Err(err) = self.spawn_at(idx) {
                tracing::warn!(child = %name, error = %err, "respawn failed, will retry on next failure");
            }
        }
    }

    fn respawn_all(self: &Arc<Self>) {
        let len = {
            let mut children = self.children.write().unwrap();
            // Stop every other live child in reverse-index order.
            for record in children.iter_mut().rev() {
                if let Some(live) = record.live.take() {
                    live.stop();
                }
            }
            children.len()
        };
        for idx in 0..len {
            if let Err(err) = self.spawn_at(idx) {
                let name = self
                    .children
                    .read()
                    .unwrap()
                    .get(idx)
                    .map(|c| c.spec.name.clone())
                    .unwrap_or_default();
                tracing::warn!(child = %name, error = %err, "respawn failed during one-for-all restart");
            }
        }
    }

    fn respawn_rest_from(self: &Arc<Self>, name: &str) {
        let (k, len) = {
            let mut children = self.children.write().unwrap();
            let Some(k) = children.iter().position(|c| c.spec.name == name) else {
                return;
            };
            for record in children[k..].iter_mut().rev() {
                if let Some(live) = record.live.take() {
                    live.stop();
                }
            }
            (k, children.len())
        };
        for idx in k..len {
            if let Err(err) = self.spawn_at(idx) {
                let cname = self
                    .children
                    .read()
                    .unwrap()
                    .get(idx)
                    .map(|c| c.spec.name.clone())
                    .unwrap_or_default();
                tracing::warn!(child = %cname, error = %err, "respawn failed during rest-for-one restart");
            }
        }
    }

    fn give_up(self: &Arc<Self>) {
        if self.given_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        let mut children = self.children.write().unwrap();
        for record in children.iter_mut().rev() {
            if let Some(live) = record.live.take() {
                live.stop();
            }
        }
        children.clear();
        drop(children);
        if let Some(cb) = self.on_give_up.read().unwrap().as_ref() {
            cb();
        }
    }

    /// Dynamically append a new child; rejects a duplicate name. The new
    /// child is spawned and monitored immediately.
    pub fn start_child(self: &Arc<Self>, spec: ChildSpec) -> Result<(), SupervisorError> {
        if self.given_up.load(Ordering::SeqCst) {
            return Err(SupervisorError::GivenUp);
        }
        {
            let mut children = self.children.write().unwrap();
            if children.iter().any(|c| c.spec.name == spec.name) {
                return Err(SupervisorError::DuplicateChildName(spec.name));
            }
            children.push(ChildRecord {
                spec,
                live: None,
                generation: 0,
            });
        }
        let idx = self.children.read().unwrap().len() - 1;
        self.spawn_at(idx)
    }

    /// Stop the named child. The usual restart-class handling still
    /// applies once the monitor observes the exit.
    pub fn terminate_child(&self, name: &str) -> Result<(), SupervisorError> {
        let children = self.children.read().unwrap();
        let record = children
            .iter()
            .find(|c| c.spec.name == name)
            .ok_or_else(|| SupervisorError::ChildNotFound(name.to_string()))?;
        if let Some(live) = &record.live {
            live.stop();
        }
        Ok(())
    }

    /// Forcibly stop then respawn a single named child, bypassing backoff
    /// and intensity accounting — this is a deliberate operator action,
    /// not a failure.
    pub fn restart_child(self: &Arc<Self>, name: &str) -> Result<(), SupervisorError> {
        let idx = {
            let mut children = self.children.write().unwrap();
            let idx = children
                .iter()
                .position(|c| c.spec.name == name)
                .ok_or_else(|| SupervisorError::ChildNotFound(name.to_string()))?;
            if let Some(live) = children[idx].live.take() {
                live.stop();
            }
            children[idx].generation += 1; // invalidate any in-flight poller
            idx
        };
        self.spawn_at(idx)
    }

    /// Stop (if live) and remove a child entirely; successors shift down
    /// to fill the gap, which is exactly what `Vec::remove` does given
    /// this crate looks children up by name rather than raw index.
    pub fn delete_child(&self, name: &str) -> Result<(), SupervisorError> {
        let mut children = self.children.write().unwrap();
        let idx = children
            .iter()
            .position(|c| c.spec.name == name)
            .ok_or_else(|| SupervisorError::ChildNotFound(name.to_string()))?;
        if let Some(live) = children[idx].live.take() {
            live.stop();
        }
        children.remove(idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    struct TestChild {
        id: ProcessId,
        outcome: StdMutex<Option<bool>>,
    }

    impl SupervisedHandle for TestChild {
        fn id(&self) -> &ProcessId {
            &self.id
        }
        fn exit_outcome(&self) -> Option<bool> {
            *self.outcome.lock().unwrap()
        }
        fn stop(&self) {
            let mut outcome = self.outcome.lock().unwrap();
            if outcome.is_none() {
                *outcome = Some(false);
            }
        }
    }

    impl TestChild {
        fn fail(&self) {
            *self.outcome.lock().unwrap() = Some(false);
        }
    }

    /// Test-only registry tracking the concrete `TestChild` most recently
    /// spawned under each name, so tests can reach in and simulate a
    /// failure without downcasting the supervisor's type-erased handles.
    type LiveRegistry = Arc<StdMutex<HashMap<String, Arc<TestChild>>>>;

    fn counting_spawner(name: &'static str, counter: Arc<AtomicU32>, registry: LiveRegistry) -> SpawnFn {
        Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let child = Arc::new(TestChild {
                id: ProcessId::new(format!("{name}-{n}")),
                outcome: StdMutex::new(None),
            });
            registry
                .lock()
                .unwrap()
                .insert(name.to_string(), child.clone());
            Ok(child as Arc<dyn SupervisedHandle>)
        })
    }

    fn immediate_backoff() -> BackoffConfig {
        BackoffConfig::constant(swarm_core::duration::DurationMs::from_millis(1))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn start_child_rejects_duplicate_name() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry: LiveRegistry = Arc::new(StdMutex::new(HashMap::new()));
        let sup = Supervisor::new(
            Strategy::OneForOne,
            RestartIntensity::default(),
            immediate_backoff(),
            vec![ChildSpec {
                name: "w1".into(),
                restart: RestartClass::Permanent,
                spawn: counting_spawner("w", counter.clone(), registry.clone()),
            }],
        );
        sup.start().unwrap();
        let err = sup
            .start_child(ChildSpec {
                name: "w1".into(),
                restart: RestartClass::Permanent,
                spawn: counting_spawner("w", counter, registry),
            })
            .unwrap_err();
        assert!(matches!(err, SupervisorError::DuplicateChildName(_)));
    }

    #[tokio::test]
    async fn one_for_one_restarts_only_the_failed_child() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry: LiveRegistry = Arc::new(StdMutex::new(HashMap::new()));
        let sup = Supervisor::new(
            Strategy::OneForOne,
            RestartIntensity {
                max_restarts: 10,
                window: swarm_core::duration::DurationMs::from_secs(60),
            },
            immediate_backoff(),
            vec![
                ChildSpec {
                    name: "w1".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w1", counter.clone(), registry.clone()),
                },
                ChildSpec {
                    name: "w2".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w2", counter.clone(), registry.clone()),
                },
                ChildSpec {
                    name: "w3".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w3", counter, registry.clone()),
                },
            ],
        );
        sup.start().unwrap();

        let w1_id = sup.live_child("w1").unwrap().id().to_string();
        let w3_id = sup.live_child("w3").unwrap().id().to_string();
        let w2_before = sup.live_child("w2").unwrap().id().to_string();

        registry.lock().unwrap().get("w2").unwrap().fail();

        wait_until(|| {
            sup.live_child("w2")
                .map(|h| h.id().to_string() != w2_before)
                .unwrap_or(false)
        })
        .await;

        assert_eq!(sup.live_child("w1").unwrap().id().to_string(), w1_id);
        assert_eq!(sup.live_child("w3").unwrap().id().to_string(), w3_id);
    }

    #[tokio::test]
    async fn one_for_all_replaces_every_child() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry: LiveRegistry = Arc::new(StdMutex::new(HashMap::new()));
        let sup = Supervisor::new(
            Strategy::OneForAll,
            RestartIntensity {
                max_restarts: 10,
                window: swarm_core::duration::DurationMs::from_secs(60),
            },
            immediate_backoff(),
            vec![
                ChildSpec {
                    name: "w1".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w1", counter.clone(), registry.clone()),
                },
                ChildSpec {
                    name: "w2".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w2", counter.clone(), registry.clone()),
                },
                ChildSpec {
                    name: "w3".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w3", counter, registry.clone()),
                },
            ],
        );
        sup.start().unwrap();

        let before: Vec<String> = ["w1", "w2", "w3"]
            .iter()
            .map(|n| sup.live_child(n).unwrap().id().to_string())
            .collect();

        registry.lock().unwrap().get("w2").unwrap().fail();

        wait_until(|| {
            ["w1", "w2", "w3"].iter().all(|n| {
                sup.live_child(n)
                    .map(|h| !before.contains(&h.id().to_string()))
                    .unwrap_or(false)
            })
        })
        .await;
    }

    #[tokio::test]
    async fn rest_for_one_restarts_failed_and_later_siblings_only() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry: LiveRegistry = Arc::new(StdMutex::new(HashMap::new()));
        let sup = Supervisor::new(
            Strategy::RestForOne,
            RestartIntensity {
                max_restarts: 10,
                window: swarm_core::duration::DurationMs::from_secs(60),
            },
            immediate_backoff(),
            vec![
                ChildSpec {
                    name: "w1".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w1", counter.clone(), registry.clone()),
                },
                ChildSpec {
                    name: "w2".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w2", counter.clone(), registry.clone()),
                },
                ChildSpec {
                    name: "w3".into(),
                    restart: RestartClass::Permanent,
                    spawn: counting_spawner("w3", counter, registry.clone()),
                },
            ],
        );
        sup.start().unwrap();

        let before: std::collections::HashMap<&str, String> = ["w1", "w2", "w3"]
            .iter()
            .map(|n| (*n, sup.live_child(n).unwrap().id().to_string()))
            .collect();

        registry.lock().unwrap().get("w2").unwrap().fail();

        wait_until(|| {
            sup.live_child("w3")
                .map(|h| h.id().to_string() != before["w3"])
                .unwrap_or(false)
        })
        .await;

        // w1 precedes the failed index and keeps its id; w2 and w3 (the
        // failed child and everything after it) are respawned with new ids.
        assert_eq!(sup.live_child("w1").unwrap().id().to_string(), before["w1"]);
        assert_ne!(sup.live_child("w2").unwrap().id().to_string(), before["w2"]);
        assert_ne!(sup.live_child("w3").unwrap().id().to_string(), before["w3"]);
    }

    #[tokio::test]
    async fn restart_intensity_exceeded_shuts_down() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry: LiveRegistry = Arc::new(StdMutex::new(HashMap::new()));
        let sup = Supervisor::new(
            Strategy::OneForOne,
            RestartIntensity {
                max_restarts: 2,
                window: swarm_core::duration::DurationMs::from_secs(60),
            },
            immediate_backoff(),
            vec![ChildSpec {
                name: "w1".into(),
                restart: RestartClass::Permanent,
                spawn: counting_spawner("w", counter, registry.clone()),
            }],
        );
        sup.start().unwrap();

        for _ in 0..3 {
            if let Some(child) = registry.lock().unwrap().get("w").cloned() {
                child.fail();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        wait_until(|| sup.has_given_up()).await;
        assert!(sup.children().is_empty());
    }

    #[tokio::test]
    async fn terminate_then_delete_child() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry: LiveRegistry = Arc::new(StdMutex::new(HashMap::new()));
        let sup = Supervisor::new(
            Strategy::OneForOne,
            RestartIntensity::default(),
            immediate_backoff(),
            vec![ChildSpec {
                name: "w1".into(),
                restart: RestartClass::Temporary,
                spawn: counting_spawner("w", counter, registry),
            }],
        );
        sup.start().unwrap();
        sup.terminate_child("w1").unwrap();
        wait_until(|| sup.live_child("w1").is_none()).await;
        sup.delete_child("w1").unwrap();
        assert!(sup.children().is_empty());
        assert!(matches!(
            sup.terminate_child("w1"),
            Err(SupervisorError::ChildNotFound(_))
        ));
    }

    #[tokio::test]
    async fn restart_child_is_a_deliberate_action_not_counted_as_a_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry: LiveRegistry = Arc::new(StdMutex::new(HashMap::new()));
        let sup = Supervisor::new(
            Strategy::OneForOne,
            RestartIntensity::default(),
            immediate_backoff(),
            vec![ChildSpec {
                name: "w1".into(),
                restart: RestartClass::Temporary,
                spawn: counting_spawner("w", counter, registry),
            }],
        );
        sup.start().unwrap();
        let before = sup.live_child("w1").unwrap().id().to_string();
        sup.restart_child("w1").unwrap();
        let after = sup.live_child("w1").unwrap().id().to_string();
        assert_ne!(before, after);
    }
}
