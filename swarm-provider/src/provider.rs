//! Provider trait for LLM backends.
//!
//! The [`Provider`] trait uses RPITIT (return-position `impl Trait` in traits)
//! and is intentionally NOT object-safe. The object-safe boundary is
//! `swarm_core::turn::Turn`, which `swarm_process::process::Process<P>`
//! dispatches through generically over `P: Provider`.

use crate::types::{ProviderRequest, ProviderResponse};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors from LLM providers, classified into the exhaustive set of
/// retryable/non-retryable classes a retry loop needs to reason about.
///
/// The first four variants are retryable by default; the last three are
/// not. [`ProviderError::classify_status`] maps an HTTP status code (when
/// the transport surfaces one) onto this enum: 429 → rate-limited,
/// 529-or-similar overload codes → overloaded, other 5xx → temporary.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider rate-limited the request. Carries an optional `retry-after`
    /// hint that MUST be honored as a lower bound on the next retry delay.
    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited {
        /// Minimum delay the provider asked callers to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// Provider is overloaded (e.g. Anthropic's 529).
    #[error("provider overloaded")]
    Overloaded,

    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// A transient failure worth retrying (network blip, 5xx) that doesn't
    /// fit a more specific class.
    #[error("temporary failure: {0}")]
    Temporary(String),

    /// The request itself was malformed; retrying would fail identically.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication/authorization failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// The caller's budget policy forbids making this call.
    #[error("budget exceeded")]
    BudgetExceeded,

    /// Could not parse the provider's response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

impl ProviderError {
    /// Whether retrying this request might succeed, absent an explicit
    /// per-agent retry-on override.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Overloaded
                | ProviderError::Timeout
                | ProviderError::Temporary(_)
        )
    }

    /// The minimum delay this error demands before the next retry, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status code (plus an optional `Retry-After` value
    /// in seconds) into the error it represents, per §4.6's classifier
    /// table: 429 → rate-limit, 529 → overloaded, other 5xx → temporary.
    pub fn classify_status(status: u16, retry_after_secs: Option<u64>, body: impl Into<String>) -> Self {
        match status {
            429 => ProviderError::RateLimited {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            529 => ProviderError::Overloaded,
            408 => ProviderError::Timeout,
            401 | 403 => ProviderError::AuthFailed(body.into()),
            400 | 404 | 422 => ProviderError::InvalidRequest(body.into()),
            500..=599 => ProviderError::Temporary(body.into()),
            _ => ProviderError::Temporary(body.into()),
        }
    }

    /// Construct a plain request-failure (network error, connection reset)
    /// that does not carry an HTTP status.
    pub fn request_failed(message: impl Into<String>) -> Self {
        ProviderError::Temporary(message.into())
    }
}

/// LLM provider interface.
///
/// Each provider (Anthropic, OpenAI, Ollama) implements this trait.
/// Provider-native features (truncation, caching, thinking blocks)
/// are handled by the provider impl using `ProviderRequest.extra`.
///
/// This trait uses RPITIT and is NOT object-safe. That's intentional —
/// `swarm_process::process::Process<P: Provider>` is generic over it, and
/// the object-safe boundary is `swarm_core::turn::Turn`.
pub trait Provider: Send + Sync {
    /// Send a completion request to the provider.
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display() {
        assert_eq!(
            ProviderError::Temporary("timeout".into()).to_string(),
            "temporary failure: timeout"
        );
        assert_eq!(
            ProviderError::RateLimited { retry_after: None }.to_string(),
            "rate limited"
        );
        assert_eq!(
            ProviderError::AuthFailed("bad key".into()).to_string(),
            "auth failed: bad key"
        );
        assert_eq!(
            ProviderError::InvalidResponse("bad json".into()).to_string(),
            "invalid response: bad json"
        );
    }

    #[test]
    fn provider_error_retryable() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Overloaded.is_retryable());
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Temporary("x".into()).is_retryable());
        assert!(!ProviderError::AuthFailed("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidResponse("x".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("x".into()).is_retryable());
        assert!(!ProviderError::BudgetExceeded.is_retryable());
    }

    #[test]
    fn classify_status_maps_spec_table() {
        assert!(matches!(
            ProviderError::classify_status(429, Some(2), "slow down"),
            ProviderError::RateLimited {
                retry_after: Some(d)
            } if d.as_secs() == 2
        ));
        assert!(matches!(
            ProviderError::classify_status(529, None, "busy"),
            ProviderError::Overloaded
        ));
        assert!(matches!(
            ProviderError::classify_status(503, None, "down"),
            ProviderError::Temporary(_)
        ));
        assert!(matches!(
            ProviderError::classify_status(401, None, "nope"),
            ProviderError::AuthFailed(_)
        ));
    }

    #[test]
    fn retry_after_is_a_lower_bound_hint() {
        let err = ProviderError::RateLimited {
            retry_after: Some(std::time::Duration::from_secs(5)),
        };
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(5)));
        assert_eq!(ProviderError::Overloaded.retry_after(), None);
    }
}
