//! Agent — the immutable blueprint a [`crate::Process`] is spawned from.

use std::sync::Arc;

use rust_decimal::Decimal;
use swarm_core::duration::DurationMs;
use swarm_provider::context::ContextStrategy;
use swarm_tool::ToolRegistry;

/// Which tools a process may call.
#[derive(Debug, Clone)]
pub enum AllowedTools {
    /// Every tool registered on the agent is callable.
    All,
    /// Only the named subset is callable.
    Named(Vec<String>),
}

impl AllowedTools {
    /// Whether `name` is permitted under this policy.
    pub fn permits(&self, name: &str) -> bool {
        match self {
            AllowedTools::All => true,
            AllowedTools::Named(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Producer for the system prompt. Re-evaluated every turn — callers
/// MUST NOT memoise its output, since a `Factory` may read live state
/// (current date, recent tool results, a counter).
#[derive(Clone)]
pub enum SystemPrompt {
    /// A fixed string, the same every turn.
    Fixed(String),
    /// A factory evaluated fresh on every turn.
    Factory(Arc<dyn Fn() -> String + Send + Sync>),
}

impl SystemPrompt {
    /// Evaluate the current value of the system prompt.
    pub fn resolve(&self) -> String {
        match self {
            SystemPrompt::Fixed(s) => s.clone(),
            SystemPrompt::Factory(f) => f(),
        }
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        SystemPrompt::Fixed(String::new())
    }
}

impl From<&str> for SystemPrompt {
    fn from(s: &str) -> Self {
        SystemPrompt::Fixed(s.to_string())
    }
}

impl From<String> for SystemPrompt {
    fn from(s: String) -> Self {
        SystemPrompt::Fixed(s)
    }
}

/// What to do when a process's cumulative cost crosses [`BudgetPolicy::max_cost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunAction {
    /// Reject the next `Send` with `ProcessError::BudgetExceeded`; the
    /// process stays alive.
    Block,
    /// Fail the process outright.
    Terminate,
}

/// Budget cap and overrun behavior.
#[derive(Debug, Clone)]
pub struct BudgetPolicy {
    /// Cumulative cost cap (provider billing units). `None` = unbounded.
    pub max_cost: Option<Decimal>,
    /// What happens when the cap is crossed.
    pub overrun: OverrunAction,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            max_cost: None,
            overrun: OverrunAction::Block,
        }
    }
}

/// Per-model rate limiting, consulted by the orchestrator's rate-limiter
/// bank (§4.5) before a process is allowed to call the backend.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum calls permitted per minute.
    pub max_per_minute: u32,
}

/// Trips after a run of consecutive backend failures and short-circuits
/// further calls for a cooldown window rather than hammering a backend
/// that's already down.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before tripping.
    pub failure_threshold: u32,
    /// How long the breaker stays open once tripped.
    pub reset_after: DurationMs,
}

/// Strategy for backoff delay growth across retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffKind {
    /// Same delay every attempt.
    Constant,
    /// `initial * attempt`.
    Linear,
    /// `initial * multiplier^(attempt - 1)`.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

/// Backoff schedule for the provider retry loop (§4.6). Shape grounded on
/// a tagged backoff-strategy config, adapted to this workspace's plain
/// `serde`/`thiserror` stack.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    /// Growth strategy.
    pub kind: BackoffKind,
    /// Delay before the first retry.
    pub initial: DurationMs,
    /// Delay ceiling, regardless of growth.
    pub max: DurationMs,
    /// Jitter fraction in `[0, 1]`; actual delay is `base * (1 + jitter * U(-1,1))`.
    pub jitter: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential { multiplier: 2.0 },
            initial: DurationMs::from_millis(200),
            max: DurationMs::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryBackoff {
    /// Compute the base delay (before jitter) for the given 1-indexed attempt.
    pub fn base_delay(&self, attempt: u32) -> DurationMs {
        let attempt = attempt.max(1);
        let ms = match self.kind {
            BackoffKind::Constant => self.initial.as_millis(),
            BackoffKind::Linear => self.initial.as_millis().saturating_mul(attempt as u64),
            BackoffKind::Exponential { multiplier } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                (self.initial.as_millis() as f64 * factor) as u64
            }
        };
        DurationMs::from_millis(ms.min(self.max.as_millis()))
    }

    /// Apply jitter to a base delay using the given uniform sample in `[-1, 1]`.
    pub fn jittered(&self, base: DurationMs, sample: f64) -> DurationMs {
        let factor = 1.0 + self.jitter * sample.clamp(-1.0, 1.0);
        let ms = (base.as_millis() as f64 * factor).max(0.0) as u64;
        DurationMs::from_millis(ms.min(self.max.as_millis()))
    }
}

/// Retry policy for backend calls.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Backoff schedule between attempts.
    pub backoff: RetryBackoff,
    /// Explicit override of which errors are retried. `None` means use
    /// each error's own `ProviderError::is_retryable` default.
    pub retry_on: Option<Arc<dyn Fn(&swarm_provider::provider::ProviderError) -> bool + Send + Sync>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: RetryBackoff::default(),
            retry_on: None,
        }
    }
}

impl RetryPolicy {
    /// Whether `err` should be retried under this policy.
    pub fn should_retry(&self, err: &swarm_provider::provider::ProviderError) -> bool {
        match &self.retry_on {
            Some(f) => f(err),
            None => err.is_retryable(),
        }
    }
}

/// The blueprint a [`crate::Process`] is spawned from.
///
/// Value-typed and shared freely: `Agent` is wrapped in an `Arc` by every
/// process spawned from it, and mutating the original value (if the
/// caller holds another handle to it) is never observed by a running
/// process — processes clone the fields they need at spawn time.
#[derive(Clone)]
pub struct Agent {
    /// Non-empty name; `Spawn` rejects `""`.
    pub name: String,
    /// Model identifier. `None` defers to the orchestrator's default.
    pub model: Option<String>,
    /// System prompt producer, re-evaluated every turn.
    pub system_prompt: SystemPrompt,
    /// Tools available to processes of this agent.
    pub tools: Arc<ToolRegistry>,
    /// Which of `tools` a process may actually call.
    pub allowed_tools: AllowedTools,
    /// Retry policy for backend calls.
    pub retry_policy: RetryPolicy,
    /// Budget cap and overrun behavior.
    pub budget: BudgetPolicy,
    /// Optional per-model rate limit.
    pub rate_limit: Option<RateLimitConfig>,
    /// Optional circuit breaker.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Default sampling temperature.
    pub temperature: Option<f64>,
    /// Default max output tokens.
    pub max_tokens: Option<u32>,
    /// Bound on turn-loop iterations. This is the single source of truth:
    /// there is no separate per-call override field anywhere else in the
    /// crate (see DESIGN.md's Open Question decision).
    pub max_iterations: u32,
    /// Optional conversation-history compaction strategy.
    pub history_manager: Option<Arc<dyn ContextStrategy>>,
    /// Token budget passed to `history_manager.should_compact`.
    pub context_window_tokens: usize,
    /// Whether processes of this agent trap exits by default.
    pub trap_exit: bool,
}

impl Agent {
    /// Build an agent with the given name and otherwise-default policy
    /// knobs. Most callers then override individual fields.
    pub fn new(name: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            model: None,
            system_prompt: SystemPrompt::default(),
            tools: Arc::new(tools),
            allowed_tools: AllowedTools::All,
            retry_policy: RetryPolicy::default(),
            budget: BudgetPolicy::default(),
            rate_limit: None,
            circuit_breaker: None,
            temperature: None,
            max_tokens: None,
            max_iterations: 20,
            history_manager: None,
            context_window_tokens: 8_000,
            trap_exit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_tools_named_permits_only_listed() {
        let allowed = AllowedTools::Named(vec!["a".into(), "b".into()]);
        assert!(allowed.permits("a"));
        assert!(!allowed.permits("c"));
        assert!(AllowedTools::All.permits("anything"));
    }

    #[test]
    fn system_prompt_factory_is_reevaluated() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let prompt = SystemPrompt::Factory(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            "hi".to_string()
        }));
        prompt.resolve();
        prompt.resolve();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let backoff = RetryBackoff {
            kind: BackoffKind::Exponential { multiplier: 2.0 },
            initial: DurationMs::from_millis(100),
            max: DurationMs::from_millis(1000),
            jitter: 0.0,
        };
        assert_eq!(backoff.base_delay(1).as_millis(), 100);
        assert_eq!(backoff.base_delay(2).as_millis(), 200);
        assert_eq!(backoff.base_delay(3).as_millis(), 400);
        assert_eq!(backoff.base_delay(10).as_millis(), 1000); // capped
    }

    #[test]
    fn linear_backoff() {
        let backoff = RetryBackoff {
            kind: BackoffKind::Linear,
            initial: DurationMs::from_millis(50),
            max: DurationMs::from_secs(10),
            jitter: 0.0,
        };
        assert_eq!(backoff.base_delay(3).as_millis(), 150);
    }
}
