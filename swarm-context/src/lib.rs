#![deny(missing_docs)]
//! Context strategy implementations for swarm-provider.
//!
//! Provides [`SlidingWindow`] for dropping oldest messages when context
//! exceeds a limit. `NoCompaction` is in swarm-provider itself.

use swarm_provider::context::ContextStrategy;
use swarm_provider::types::{ContentPart, ProviderMessage, Role};

/// Sliding window context strategy.
///
/// When context exceeds the limit, drops the oldest messages
/// (keeping the first message, which is typically the initial user message).
pub struct SlidingWindow {
    /// Approximate chars-per-token ratio for estimation.
    chars_per_token: usize,
}

impl SlidingWindow {
    /// Create a new sliding window strategy.
    ///
    /// `chars_per_token` controls the token estimation granularity
    /// (default: 4 chars per token).
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }

    /// Create with a custom chars-per-token ratio.
    pub fn with_ratio(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    fn estimate_message_tokens(&self, msg: &ProviderMessage) -> usize {
        msg.content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text.len() / self.chars_per_token,
                ContentPart::ToolUse { input, .. } => {
                    input.to_string().len() / self.chars_per_token
                }
                ContentPart::ToolResult { content, .. } => content.len() / self.chars_per_token,
                ContentPart::Image { .. } => 1000,
            })
            .sum::<usize>()
            + 4 // overhead per message (role, formatting)
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStrategy for SlidingWindow {
    fn token_estimate(&self, messages: &[ProviderMessage]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate_message_tokens(m))
            .sum()
    }

    fn should_compact(&self, messages: &[ProviderMessage], limit: usize) -> bool {
        self.token_estimate(messages) > limit
    }

    fn compact(&self, messages: Vec<ProviderMessage>) -> Vec<ProviderMessage> {
        if messages.len() <= 2 {
            return messages;
        }

        // Spec: at least the last two exchanges (up to 4 messages: the
        // trailing user/assistant pairs) MUST survive every compaction
        // pass, regardless of the token-budget heuristic below.
        let min_tail = messages.len().min(4);

        // Work backwards, accumulating messages until roughly half the
        // original size is reached (heuristic: keep recent context, drop
        // old), but never below `min_tail`.
        let total_tokens: usize = messages.iter().map(|m| self.estimate_message_tokens(m)).sum();
        let target = total_tokens / 2;

        let mut tail_len = 0usize;
        let mut current_tokens = 0usize;
        for msg in messages.iter().rev() {
            if tail_len >= min_tail && current_tokens >= target {
                break;
            }
            current_tokens += self.estimate_message_tokens(msg);
            tail_len += 1;
        }
        let tail_len = tail_len.max(min_tail).min(messages.len());

        let split = messages.len() - tail_len;
        if split == 0 {
            return messages;
        }

        // Spec: a compaction pass MUST insert its summary as a system-role
        // prefix rather than silently dropping the earlier messages.
        let summary = ProviderMessage {
            role: Role::System,
            content: vec![ContentPart::Text {
                text: format!("[context compacted: {split} earlier message(s) omitted]"),
            }],
        };

        let mut result = Vec::with_capacity(tail_len + 1);
        result.push(summary);
        result.extend_from_slice(&messages[split..]);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_provider::types::Role;

    fn text_message(role: Role, text: &str) -> ProviderMessage {
        ProviderMessage {
            role,
            content: vec![ContentPart::Text {
                text: text.to_string(),
            }],
        }
    }

    #[test]
    fn sliding_window_estimates_tokens() {
        let sw = SlidingWindow::new();
        let messages = vec![text_message(Role::User, &"a".repeat(400))];
        // 400 chars / 4 = 100, + 4 overhead = 104
        assert_eq!(sw.token_estimate(&messages), 104);
    }

    #[test]
    fn sliding_window_should_compact() {
        let sw = SlidingWindow::new();
        let messages = vec![text_message(Role::User, &"a".repeat(400))];
        assert!(sw.should_compact(&messages, 50));
        assert!(!sw.should_compact(&messages, 200));
    }

    #[test]
    fn sliding_window_compact_inserts_system_summary_and_keeps_recent() {
        let sw = SlidingWindow::new();
        let messages = vec![
            text_message(Role::User, &"first ".repeat(100)),
            text_message(Role::Assistant, &"old ".repeat(100)),
            text_message(Role::User, &"middle ".repeat(100)),
            text_message(Role::Assistant, &"recent ".repeat(100)),
            text_message(Role::User, &"latest ".repeat(100)),
        ];

        let compacted = sw.compact(messages.clone());

        // A compaction pass inserts its summary as a system-role prefix.
        assert_eq!(compacted[0].role, Role::System);

        // Should keep some recent messages, dropping the oldest.
        assert!(compacted.len() < messages.len() + 1);

        // Last message should be the latest.
        assert_eq!(
            compacted.last().unwrap().content[0],
            messages.last().unwrap().content[0]
        );
    }

    #[test]
    fn sliding_window_compact_always_keeps_last_two_exchanges() {
        let sw = SlidingWindow::new();
        // Two cheap messages, then the most recent one is huge. The
        // token-budget heuristic alone would stop at that single most
        // recent message (it already exceeds half the total on its
        // own), but the last-two-exchanges guarantee forces at least
        // the last 4 messages to survive regardless.
        let mut messages = vec![text_message(Role::User, "intro")];
        for i in 0..3 {
            let role = if i % 2 == 0 { Role::Assistant } else { Role::User };
            messages.push(text_message(role, &format!("message {i}")));
        }
        messages.push(text_message(Role::Assistant, &"x".repeat(2000)));

        let compacted = sw.compact(messages.clone());
        assert_eq!(compacted[0].role, Role::System);
        assert_eq!(compacted.len(), 5); // 1 system summary + last 4 messages
        assert_eq!(compacted[1..], messages[1..]);
    }

    #[test]
    fn sliding_window_short_messages_unchanged() {
        let sw = SlidingWindow::new();
        let messages = vec![
            text_message(Role::User, "hi"),
            text_message(Role::Assistant, "hello"),
        ];

        let compacted = sw.compact(messages.clone());
        assert_eq!(compacted.len(), messages.len());
    }

    #[test]
    fn sliding_window_single_message_unchanged() {
        let sw = SlidingWindow::new();
        let messages = vec![text_message(Role::User, "hi")];
        let compacted = sw.compact(messages.clone());
        assert_eq!(compacted.len(), 1);
    }
}
