//! `Process` — a running instance spawned from an [`Agent`] blueprint.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use rand::Rng;
use rust_decimal::Decimal;
use swarm_core::duration::DurationMs;
use swarm_core::hook::{HookAction, HookContext, HookPoint};
use swarm_core::id::ProcessId;
use swarm_hooks::HookRegistry;
use swarm_link::{ExitReason, ExitSignal, ExitTarget, LinkRegistry};
use swarm_provider::provider::{Provider, ProviderError};
use swarm_provider::types::{
    ContentPart, ProviderMessage, ProviderRequest, Role, StopReason, ToolSchema,
};
use swarm_tool::{ProcessMetricsSnapshot, ToolContext};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent::{Agent, OverrunAction};
use crate::error::ProcessError;
use crate::wire::{parse_tool_uses, write_tool_result, write_tool_use, ToolResultBlock, ToolUseBlock};

/// Lifecycle state of a process. Transitions out of a terminal state
/// (`Completed`/`Failed`/`Timeout`) are no-ops — whichever terminal state
/// is reached first wins, guaranteeing idempotent termination (P3, P4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Status {
    /// Spawned, or between calls with no turn loop in progress.
    Pending = 0,
    /// A turn loop is in progress.
    Running = 1,
    /// Finished normally.
    Completed = 2,
    /// Finished with an error (including cascaded link failures).
    Failed = 3,
    /// Hit a hard wall-clock deadline.
    Timeout = 4,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::Pending,
            1 => Status::Running,
            2 => Status::Completed,
            3 => Status::Failed,
            _ => Status::Timeout,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Timeout)
    }
}

struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    fn new(initial: Status) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    fn get(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move to `next` unless already in a terminal state. Returns whether
    /// the transition actually happened.
    fn transition(&self, next: Status) -> bool {
        loop {
            let current = self.0.load(Ordering::SeqCst);
            if Status::from_u8(current).is_terminal() {
                return false;
            }
            if self
                .0
                .compare_exchange(current, next as u8, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Tracks consecutive backend failures for `Agent::circuit_breaker`.
/// Trips open after `failure_threshold` consecutive failures and stays
/// open until `reset_after` elapses, short-circuiting further backend
/// calls rather than hammering a provider that's already down.
struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// `Some(remaining_open)` if the breaker is currently open under
    /// `config`; clears the open state once `reset_after` has elapsed.
    fn check_open(&self, config: &crate::agent::CircuitBreakerConfig) -> bool {
        let mut opened_at = self.opened_at.lock().unwrap();
        match *opened_at {
            Some(at) if at.elapsed() < config.reset_after.to_std() => true,
            Some(_) => {
                *opened_at = None;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                false
            }
            None => false,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock().unwrap() = None;
    }

    fn record_failure(&self, config: &crate::agent::CircuitBreakerConfig) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= config.failure_threshold {
            *self.opened_at.lock().unwrap() = Some(Instant::now());
        }
    }
}

/// Capacity of a process's exit-signal channel (spec §3/§5: bounded,
/// default 16, non-blocking send with drop-newest on full).
const EXIT_CHANNEL_CAPACITY: usize = 16;

/// Running metrics for a process, updated as its turn loop executes.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Metrics {
    /// Turns completed so far.
    pub iterations: u32,
    /// Cumulative input tokens consumed.
    pub input_tokens: u64,
    /// Cumulative output tokens generated.
    pub output_tokens: u64,
    /// Cumulative cost in the provider's billing unit.
    pub cost: Decimal,
    /// Number of tool calls dispatched.
    pub tool_calls: u32,
    /// Number of errors recorded (retried backend calls, failed tools).
    pub errors: u32,
    /// Most recent error message, if any.
    pub last_error: Option<String>,
}

/// One step of a [`Process::send_stream`] call, at whole-turn granularity.
///
/// The underlying [`Provider`] trait exposes only a single `complete()`
/// call with no token-level streaming contract, and no concrete backend in
/// this workspace implements one — so events are emitted per model call
/// and per tool call rather than per token. A backend that later grows
/// real token streaming can refine this without changing `Process`'s
/// public shape.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The model produced output this turn.
    ModelOutput {
        /// The raw text content of the response.
        text: String,
        /// Why the model stopped.
        stop_reason: StopReason,
    },
    /// A tool call was dispatched and has a result.
    ToolResult {
        /// Tool name.
        name: String,
        /// Whether the call errored.
        is_error: bool,
    },
    /// The loop reached a terminal response.
    Done {
        /// The final assistant text.
        result: String,
    },
    /// The loop ended in an error. Carries only the display message —
    /// callers that need the typed error should use [`Process::send`]
    /// instead of [`Process::send_stream`].
    Failed {
        /// `ProcessError`'s `Display` text.
        message: String,
    },
}

/// A running instance spawned from an [`Agent`] blueprint.
///
/// `Process<P>` owns its conversation history, its metrics, and the
/// cancellation token governing in-flight calls. It implements
/// [`ExitTarget`] so the shared [`LinkRegistry`] can deliver exit signals
/// to it and cascade failures through it.
pub struct Process<P: Provider> {
    id: ProcessId,
    name: Mutex<Option<String>>,
    agent: Arc<Agent>,
    provider: Arc<P>,
    hooks: Arc<HookRegistry>,
    links: Arc<LinkRegistry>,
    status: AtomicStatus,
    trap_exit: std::sync::atomic::AtomicBool,
    history: Mutex<Vec<ProviderMessage>>,
    metrics: Mutex<Metrics>,
    iteration: AtomicU32,
    started_at: Instant,
    started_at_wall: std::time::SystemTime,
    finished_at_wall: Mutex<Option<std::time::SystemTime>>,
    cancel: CancellationToken,
    result: Mutex<Option<String>>,
    circuit: CircuitBreaker,
    exit_tx: Sender<ExitSignal>,
    exit_rx: Mutex<Option<Receiver<ExitSignal>>>,
}

impl<P: Provider + 'static> Process<P> {
    /// Spawn a process from an agent blueprint, registering it in the
    /// given link registry.
    ///
    /// Returns an `Arc` because the process must be able to hand out a
    /// `Weak<dyn ExitTarget>` of itself to the link registry; callers
    /// should keep this `Arc` as the process's sole strong owner.
    pub fn spawn(
        id: ProcessId,
        agent: Arc<Agent>,
        provider: Arc<P>,
        hooks: Arc<HookRegistry>,
        links: Arc<LinkRegistry>,
    ) -> Arc<Self> {
        let trap_exit = agent.trap_exit;
        let (exit_tx, exit_rx) = tokio::sync::mpsc::channel(EXIT_CHANNEL_CAPACITY);
        let proc = Arc::new(Self {
            id: id.clone(),
            name: Mutex::new(None),
            agent,
            provider,
            hooks,
            links: links.clone(),
            status: AtomicStatus::new(Status::Pending),
            trap_exit: std::sync::atomic::AtomicBool::new(trap_exit),
            history: Mutex::new(Vec::new()),
            metrics: Mutex::new(Metrics::default()),
            iteration: AtomicU32::new(0),
            started_at: Instant::now(),
            started_at_wall: std::time::SystemTime::now(),
            finished_at_wall: Mutex::new(None),
            cancel: CancellationToken::new(),
            result: Mutex::new(None),
            circuit: CircuitBreaker::new(),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
        });
        let weak: Weak<dyn ExitTarget> = Arc::downgrade(&proc) as Weak<dyn ExitTarget>;
        links.register(id, weak);
        proc
    }

    /// This process's id.
    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    /// Agent blueprint this process was spawned from.
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Wall-clock time this process was spawned, as milliseconds since the
    /// Unix epoch. Exists alongside the monotonic `started_at` `Instant`
    /// (used for elapsed-time math) because a snapshot meant to survive a
    /// process restart needs a serializable timestamp.
    pub fn started_at_epoch_ms(&self) -> u64 {
        self.started_at_wall
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Wall-clock time this process reached a terminal status, as
    /// milliseconds since the Unix epoch. `None` until `Complete`/`Fail`/
    /// `kill` actually transitions it (the CAS guard that makes those
    /// idempotent also means this is stamped at most once).
    pub fn finished_at_epoch_ms(&self) -> Option<u64> {
        self.finished_at_wall.lock().unwrap().map(|t| {
            t.duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64
        })
    }

    fn stamp_finished(&self) {
        *self.finished_at_wall.lock().unwrap() = Some(std::time::SystemTime::now());
    }

    /// Take ownership of this process's exit-signal receiver (spec §3/§5's
    /// bounded, drop-newest channel that link-trap and monitor deliveries
    /// land on). At most one consumer can drain it; returns `None` if
    /// already taken.
    pub fn take_exit_receiver(&self) -> Option<Receiver<ExitSignal>> {
        self.exit_rx.lock().unwrap().take()
    }

    /// Registered display name, if any was assigned at spawn/register time.
    pub fn name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    /// Assign a registry display name.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().unwrap() = Some(name.into());
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Snapshot of the process's current running metrics.
    pub fn metrics(&self) -> Metrics {
        self.metrics.lock().unwrap().clone()
    }

    /// The last result this process produced, if it ever completed one.
    pub fn last_result(&self) -> Option<String> {
        self.result.lock().unwrap().clone()
    }

    /// Cancellation token governing in-flight `send`/`send_stream` calls.
    /// Cancelling it stops the loop at its next suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current conversation history.
    pub fn history(&self) -> Vec<ProviderMessage> {
        self.history.lock().unwrap().clone()
    }

    /// Toggle whether this process traps exits at runtime (distinct from
    /// the blueprint's default).
    pub fn set_trap_exit(&self, trap: bool) {
        self.trap_exit.store(trap, Ordering::SeqCst);
    }

    fn metrics_snapshot(&self) -> ProcessMetricsSnapshot {
        let m = self.metrics.lock().unwrap();
        ProcessMetricsSnapshot {
            iterations: m.iterations,
            input_tokens: m.input_tokens,
            output_tokens: m.output_tokens,
            cost: m.cost,
            tool_calls: m.tool_calls,
            errors: m.errors,
        }
    }

    fn tool_context(&self) -> ToolContext {
        let mine = self.metrics_snapshot();
        ToolContext::new(self.id.clone(), Arc::new(move || mine.clone()))
    }

    /// Forcibly kill this process: cancels the in-flight call, transitions
    /// to `Completed` (a kill is not a failure — the orchestrator's
    /// complete emitter, not its failed one, observes it, result empty),
    /// stamps the completed timestamp, and propagates a `Killed` exit
    /// signal along its links/monitors.
    pub fn kill(self: &Arc<Self>) {
        self.cancel.cancel();
        if self.status.transition(Status::Completed) {
            self.stamp_finished();
            let signal = ExitSignal::new(self.id.clone(), &self.agent.name, ExitReason::Killed)
                .with_error("killed");
            self.links.propagate(&self.id, signal);
        }
    }

    fn record_error(&self, message: impl Into<String>) {
        let mut m = self.metrics.lock().unwrap();
        m.errors += 1;
        m.last_error = Some(message.into());
    }

    /// Send a user message and run the turn loop to completion, returning
    /// the final assistant text or the terminal error.
    pub async fn send(self: &Arc<Self>, input: impl Into<String>) -> Result<String, ProcessError> {
        self.run(input.into(), None).await
    }

    /// Send a user message and drive the turn loop on a background task,
    /// emitting a [`StreamEvent`] per model call and per tool result via
    /// the returned channel.
    pub async fn send_stream(
        self: &Arc<Self>,
        input: impl Into<String>,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, ProcessError> {
        let input = input.into();
        self.guard_runnable(&input)?;
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let me = self.clone();
        tokio::spawn(async move {
            let _ = me.run(input, Some(tx)).await;
        });
        Ok(rx)
    }

    fn guard_runnable(&self, input: &str) -> Result<(), ProcessError> {
        if self.status.get().is_terminal() {
            return Err(ProcessError::NotRunning(self.id.clone()));
        }
        if input.trim().is_empty() {
            return Err(ProcessError::InvalidInput("empty input".into()));
        }
        Ok(())
    }

    async fn run(
        self: &Arc<Self>,
        input: String,
        tx: Option<Sender<StreamEvent>>,
    ) -> Result<String, ProcessError> {
        let span = tracing::info_span!(
            "process_turn",
            process_id = %self.id,
            agent = %self.agent.name,
        );
        self.run_inner(input, tx).instrument(span).await
    }

    async fn run_inner(
        self: &Arc<Self>,
        input: String,
        tx: Option<Sender<StreamEvent>>,
    ) -> Result<String, ProcessError> {
        self.guard_runnable(&input)?;
        self.status.transition(Status::Running);
        self.history.lock().unwrap().push(ProviderMessage {
            role: Role::User,
            content: vec![ContentPart::Text { text: input }],
        });

        let outcome = self.run_turn_loop(tx.as_ref()).await;
        match &outcome {
            Ok(result) => {
                self.status.transition(Status::Completed);
                self.stamp_finished();
                tracing::info!(process_id = %self.id, agent = %self.agent.name, "process completed");
                *self.result.lock().unwrap() = Some(result.clone());
                let signal = ExitSignal::new(self.id.clone(), &self.agent.name, ExitReason::Normal)
                    .with_result(serde_json::Value::String(result.clone()));
                self.links.propagate(&self.id, signal);
                if let Some(tx) = &tx {
                    let _ = tx.send(StreamEvent::Done {
                        result: result.clone(),
                    }).await;
                }
            }
            Err(ProcessError::BudgetExceeded(_)) if self.agent.budget.overrun == OverrunAction::Block =>
            {
                // Stays alive: revert to Pending rather than failing, so a
                // later `send` (perhaps after the caller raises the budget
                // or resets it) can still proceed.
                self.status.transition(Status::Pending);
                if let Some(tx) = &tx {
                    let _ = tx
                        .send(StreamEvent::Failed {
                            message: outcome.as_ref().unwrap_err().to_string(),
                        })
                        .await;
                }
            }
            Err(ProcessError::CircuitOpen(_)) => {
                // A tripped breaker is a transient backend-availability
                // condition, not a process failure: revert to Pending so
                // the next `send`, once the cooldown elapses, can proceed.
                self.status.transition(Status::Pending);
                if let Some(tx) = &tx {
                    let _ = tx
                        .send(StreamEvent::Failed {
                            message: outcome.as_ref().unwrap_err().to_string(),
                        })
                        .await;
                }
            }
            Err(err) => {
                self.record_error(err.to_string());
                self.status.transition(Status::Failed);
                self.stamp_finished();
                tracing::warn!(
                    process_id = %self.id,
                    agent = %self.agent.name,
                    reason = %err,
                    "process failed",
                );
                let signal = ExitSignal::new(self.id.clone(), &self.agent.name, ExitReason::Error)
                    .with_error(err.to_string());
                self.links.propagate(&self.id, signal);
                if let Some(tx) = &tx {
                    let _ = tx
                        .send(StreamEvent::Failed {
                            message: err.to_string(),
                        })
                        .await;
                }
            }
        }
        outcome
    }

    async fn run_turn_loop(
        self: &Arc<Self>,
        tx: Option<&Sender<StreamEvent>>,
    ) -> Result<String, ProcessError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ProcessError::Cancelled(self.id.clone()));
            }

            let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
            if iteration > self.agent.max_iterations {
                return Err(ProcessError::MaxIterationsExceeded(
                    self.id.clone(),
                    self.agent.max_iterations,
                ));
            }

            if let Some(max_cost) = self.agent.budget.max_cost {
                let current = self.metrics.lock().unwrap().cost;
                if current > max_cost {
                    return Err(ProcessError::BudgetExceeded(self.id.clone()));
                }
            }

            let hook_ctx = self.build_hook_context(HookPoint::PreInference, iteration);
            self.hooks.dispatch(&hook_ctx).await;

            let messages = self.build_messages();
            let request = ProviderRequest {
                model: self.agent.model.clone(),
                messages,
                tools: self.build_tool_schemas(),
                max_tokens: self.agent.max_tokens,
                temperature: self.agent.temperature,
                system: Some(self.agent.system_prompt.resolve()),
                extra: serde_json::Value::Null,
            };

            let response = self.call_with_retry(request).await?;

            {
                let mut m = self.metrics.lock().unwrap();
                m.iterations = iteration;
                m.input_tokens += response.usage.input_tokens;
                m.output_tokens += response.usage.output_tokens;
                if let Some(cost) = response.cost {
                    m.cost += cost;
                }
            }

            let preamble = response
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");

            // The backend may hand back tool calls natively (structured
            // `ContentPart::ToolUse`), or — when it isn't natively
            // structured — embed them as wire-format blocks inside its
            // text (spec §6). Native takes precedence; the text is only
            // parsed for blocks when nothing structured came back.
            let native_tool_uses: Vec<ToolUseBlock> = response
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolUse { id, name, input } => Some(ToolUseBlock {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect();
            let tool_uses = if native_tool_uses.is_empty() {
                parse_tool_uses(&preamble)
            } else {
                native_tool_uses
            };

            let hook_ctx = self.build_hook_context(HookPoint::PostInference, iteration);
            self.hooks.dispatch(&hook_ctx).await;

            if let Some(tx) = tx {
                let _ = tx
                    .send(StreamEvent::ModelOutput {
                        text: preamble.clone(),
                        stop_reason: response.stop_reason.clone(),
                    })
                    .await;
            }

            if tool_uses.is_empty() || response.stop_reason != StopReason::ToolUse {
                self.history.lock().unwrap().push(ProviderMessage {
                    role: Role::Assistant,
                    content: vec![ContentPart::Text {
                        text: preamble.clone(),
                    }],
                });
                self.maybe_compact();
                return Ok(preamble);
            }

            // An assistant turn with tool calls is represented in history
            // as the preamble text followed by one tool-use wire block per
            // call (spec §6), regardless of whether the calls themselves
            // arrived natively or as wire text.
            let assistant_text = std::iter::once(preamble.clone())
                .chain(tool_uses.iter().map(write_tool_use))
                .collect::<Vec<_>>()
                .join("\n");
            self.history.lock().unwrap().push(ProviderMessage {
                role: Role::Assistant,
                content: vec![ContentPart::Text {
                    text: assistant_text,
                }],
            });

            let mut result_blocks = Vec::with_capacity(tool_uses.len());
            for call in tool_uses {
                if self.cancel.is_cancelled() {
                    return Err(ProcessError::Cancelled(self.id.clone()));
                }
                if !self.agent.allowed_tools.permits(&call.name) {
                    result_blocks.push(ToolResultBlock {
                        tool_use_id: call.id.clone(),
                        name: call.name.clone(),
                        content: format!("tool '{}' is not permitted for this agent", call.name),
                        is_error: true,
                    });
                    continue;
                }

                let mut pre_ctx = self.build_hook_context(HookPoint::PreToolUse, iteration);
                pre_ctx.tool_name = Some(call.name.clone());
                pre_ctx.tool_input = Some(call.input.clone());
                let action = self.hooks.dispatch(&pre_ctx).await;

                let input = match action {
                    HookAction::SkipTool { reason } => {
                        result_blocks.push(ToolResultBlock {
                            tool_use_id: call.id.clone(),
                            name: call.name.clone(),
                            content: format!("skipped by policy: {reason}"),
                            is_error: false,
                        });
                        continue;
                    }
                    HookAction::ModifyToolInput { new_input } => new_input,
                    _ => call.input.clone(),
                };

                let Some(tool) = self.agent.tools.get(&call.name) else {
                    result_blocks.push(ToolResultBlock {
                        tool_use_id: call.id.clone(),
                        name: call.name.clone(),
                        content: format!("unknown tool: {}", call.name),
                        is_error: true,
                    });
                    continue;
                };

                let call_result = tool.call(input, self.tool_context()).await;
                self.metrics.lock().unwrap().tool_calls += 1;

                let (content, is_error) = match call_result {
                    Ok(v) => (v.to_string(), false),
                    Err(e) => {
                        self.record_error(e.to_string());
                        (e.to_string(), true)
                    }
                };

                let mut post_ctx = self.build_hook_context(HookPoint::PostToolUse, iteration);
                post_ctx.tool_name = Some(call.name.clone());
                post_ctx.tool_result = Some(content.clone());
                let action = self.hooks.dispatch(&post_ctx).await;
                let content = match action {
                    HookAction::ModifyToolOutput { new_output } => new_output.to_string(),
                    _ => content,
                };

                if let Some(tx) = tx {
                    let _ = tx
                        .send(StreamEvent::ToolResult {
                            name: call.name.clone(),
                            is_error,
                        })
                        .await;
                }

                result_blocks.push(ToolResultBlock {
                    tool_use_id: call.id,
                    name: call.name,
                    content,
                    is_error,
                });
            }

            let result_text = result_blocks
                .iter()
                .map(write_tool_result)
                .collect::<Vec<_>>()
                .join("\n");
            self.history.lock().unwrap().push(ProviderMessage {
                role: Role::User,
                content: vec![ContentPart::Text { text: result_text }],
            });

            let exit_ctx = self.build_hook_context(HookPoint::ExitCheck, iteration);
            if let HookAction::Halt { reason } = self.hooks.dispatch(&exit_ctx).await {
                return Err(ProcessError::Other(
                    format!("halted by hook: {reason}").into(),
                ));
            }

            self.maybe_compact();
        }
    }

    fn build_hook_context(&self, point: HookPoint, iteration: u32) -> HookContext {
        let m = self.metrics.lock().unwrap();
        let mut ctx = HookContext::new(point);
        ctx.tokens_used = m.input_tokens + m.output_tokens;
        ctx.cost = m.cost;
        ctx.turns_completed = iteration;
        ctx.elapsed = DurationMs::from_millis(self.started_at.elapsed().as_millis() as u64);
        ctx
    }

    fn build_messages(&self) -> Vec<ProviderMessage> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.content.is_empty())
            .cloned()
            .collect()
    }

    /// Schemas for every tool this process's agent permits, advertised to
    /// the backend so it can request them natively.
    fn build_tool_schemas(&self) -> Vec<ToolSchema> {
        self.agent
            .tools
            .iter()
            .filter(|tool| self.agent.allowed_tools.permits(tool.name()))
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    fn maybe_compact(&self) {
        let Some(strategy) = &self.agent.history_manager else {
            return;
        };
        let mut history = self.history.lock().unwrap();
        if strategy.should_compact(&history, self.agent.context_window_tokens) {
            let compacted = strategy.compact(std::mem::take(&mut *history));
            *history = compacted;
        }
    }

    async fn call_with_retry(
        &self,
        request: ProviderRequest,
    ) -> Result<swarm_provider::types::ProviderResponse, ProcessError> {
        let policy = &self.agent.retry_policy;
        let mut attempt = 0u32;
        loop {
            if let Some(breaker) = &self.agent.circuit_breaker {
                if self.circuit.check_open(breaker) {
                    return Err(ProcessError::CircuitOpen(self.id.clone()));
                }
            }

            attempt += 1;
            match self.provider.complete(request.clone()).await {
                Ok(resp) => {
                    self.circuit.record_success();
                    return Ok(resp);
                }
                Err(err) => {
                    self.record_error(err.to_string());
                    if let Some(breaker) = &self.agent.circuit_breaker {
                        self.circuit.record_failure(breaker);
                    }
                    let retryable = policy.should_retry(&err);
                    if !retryable || attempt >= policy.max_attempts {
                        return Err(ProcessError::Provider(err));
                    }
                    let base = policy.backoff.base_delay(attempt);
                    let sample = rand::thread_rng().gen_range(-1.0f64..=1.0f64);
                    let mut delay = policy.backoff.jittered(base, sample);
                    if let Some(retry_after) = err.retry_after() {
                        let retry_after = DurationMs::from(retry_after);
                        if retry_after > delay {
                            delay = retry_after;
                        }
                    }
                    tracing::debug!(
                        process_id = %self.id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "retrying provider call"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay.to_std()) => {}
                        _ = self.cancel.cancelled() => {
                            return Err(ProcessError::Cancelled(self.id.clone()));
                        }
                    }
                }
            }
        }
    }
}

impl<P: Provider + 'static> ExitTarget for Process<P> {
    fn id(&self) -> &ProcessId {
        &self.id
    }

    fn agent_name(&self) -> &str {
        &self.agent.name
    }

    fn traps_exit(&self) -> bool {
        self.trap_exit.load(Ordering::SeqCst)
    }

    fn deliver_exit_signal(&self, signal: ExitSignal) {
        tracing::trace!(
            process_id = %self.id,
            peer_id = %signal.peer_id,
            reason = ?signal.reason,
            "delivered exit signal"
        );
        // Non-blocking, drop-newest on full (spec §3/§5) — never stalls the
        // propagator, and a trap-exit or monitoring process that isn't
        // draining promptly loses the newest signal rather than backing up
        // the shared link registry.
        let _ = self.exit_tx.try_send(signal);
    }

    fn cascade_fail(&self, signal: ExitSignal) {
        if self.status.transition(Status::Failed) {
            let error = signal
                .error
                .clone()
                .unwrap_or_else(|| "linked process died".to_string());
            self.record_error(error.clone());
            self.stamp_finished();
            self.cancel.cancel();
            let outbound = ExitSignal::new(self.id.clone(), &self.agent.name, ExitReason::Linked)
                .with_error(error);
            self.links.propagate(&self.id, outbound);
        }
    }
}
