//! Token usage tracking for LLM operations.
//!
//! [`Usage`] carries one call's token counts as reported by the provider's
//! `usage` field; [`TokenCounter`] accumulates them across a session. The
//! counter is shared down the call stack by reference and mutated from
//! concurrent agent calls, so its fields are atomics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Token usage reported for a single provider call.
///
/// Aligns with the chat-completions `usage` object; `prompt_tokens` /
/// `completion_tokens` are accepted as aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input/prompt.
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u64,

    /// Number of tokens in the output/completion.
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u64,

    /// Total tokens used (input + output).
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Check if no tokens were used.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl std::fmt::Display for Usage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Usage(in: {}, out: {}, total: {})",
            self.input_tokens, self.output_tokens, self.total_tokens
        )
    }
}

/// Accumulator of LLM call statistics for one session.
///
/// Every LLM invocation that receives a counter records exactly one entry
/// per completed provider call. Increments are atomic so fan-out agent
/// calls can share one counter by reference; counts are monotonically
/// non-decreasing until [`TokenCounter::reset`].
#[derive(Debug, Default)]
pub struct TokenCounter {
    calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

/// A point-in-time copy of a [`TokenCounter`], suitable for serialization
/// into API responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounterSnapshot {
    /// Number of completed LLM calls.
    pub llm_calling_times: u64,
    /// Total input tokens across all calls.
    pub total_input_token: u64,
    /// Total output tokens across all calls.
    pub total_output_token: u64,
}

impl TokenCounterSnapshot {
    /// Total tokens (input + output).
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.total_input_token + self.total_output_token
    }
}

impl TokenCounter {
    /// Create a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    /// Record one completed LLM call.
    pub fn add_call(&self, input_tokens: u64, output_tokens: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(output_tokens, Ordering::Relaxed);
    }

    /// Record one completed LLM call from a provider [`Usage`] value.
    pub fn add_usage(&self, usage: Usage) {
        self.add_call(usage.input_tokens, usage.output_tokens);
    }

    /// Number of completed LLM calls.
    #[must_use]
    pub fn llm_calling_times(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total input tokens across all calls.
    #[must_use]
    pub fn total_input_token(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed)
    }

    /// Total output tokens across all calls.
    #[must_use]
    pub fn total_output_token(&self) -> u64 {
        self.output_tokens.load(Ordering::Relaxed)
    }

    /// Total tokens (input + output).
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.total_input_token() + self.total_output_token()
    }

    /// Return all counters to zero.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
    }

    /// Take a serializable copy of the current counts.
    #[must_use]
    pub fn snapshot(&self) -> TokenCounterSnapshot {
        TokenCounterSnapshot {
            llm_calling_times: self.llm_calling_times(),
            total_input_token: self.total_input_token(),
            total_output_token: self.total_output_token(),
        }
    }
}

impl std::fmt::Display for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TokenCounter(calls={}, input={}, output={}, total={})",
            self.llm_calling_times(),
            self.total_input_token(),
            self.total_output_token(),
            self.total_tokens()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod usage {
        use super::*;

        #[test]
        fn new_computes_total() {
            let usage = Usage::new(100, 50);
            assert_eq!(usage.total_tokens, 150);
        }

        #[test]
        fn zero_is_empty() {
            assert!(Usage::zero().is_empty());
            assert!(!Usage::new(1, 0).is_empty());
        }

        #[test]
        fn serde_alias_prompt_tokens() {
            let json = r#"{"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}"#;
            let usage: Usage = serde_json::from_str(json).unwrap();
            assert_eq!(usage.input_tokens, 100);
            assert_eq!(usage.output_tokens, 50);
        }

        #[test]
        fn serde_defaults_on_missing_fields() {
            let usage: Usage = serde_json::from_str("{}").unwrap();
            assert!(usage.is_empty());
        }
    }

    mod token_counter {
        use super::*;
        use std::sync::Arc;

        #[test]
        fn add_call_accumulates() {
            let counter = TokenCounter::new();
            counter.add_call(100, 50);
            counter.add_call(200, 100);

            assert_eq!(counter.llm_calling_times(), 2);
            assert_eq!(counter.total_input_token(), 300);
            assert_eq!(counter.total_output_token(), 150);
            assert_eq!(counter.total_tokens(), 450);
        }

        #[test]
        fn total_is_input_plus_output_at_every_step() {
            let counter = TokenCounter::new();
            for i in 0..10 {
                counter.add_call(i, i * 2);
                assert_eq!(
                    counter.total_tokens(),
                    counter.total_input_token() + counter.total_output_token()
                );
            }
        }

        #[test]
        fn reset_zeroes_everything() {
            let counter = TokenCounter::new();
            counter.add_call(10, 20);
            counter.reset();
            assert_eq!(counter.snapshot(), TokenCounterSnapshot::default());
        }

        #[test]
        fn add_usage_records_one_call() {
            let counter = TokenCounter::new();
            counter.add_usage(Usage::new(7, 3));
            assert_eq!(counter.llm_calling_times(), 1);
            assert_eq!(counter.total_tokens(), 10);
        }

        #[test]
        fn snapshot_total() {
            let counter = TokenCounter::new();
            counter.add_call(40, 2);
            assert_eq!(counter.snapshot().total_tokens(), 42);
        }

        #[tokio::test]
        async fn concurrent_increments_do_not_lose_updates() {
            let counter = Arc::new(TokenCounter::new());
            let mut handles = Vec::new();
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                handles.push(tokio::spawn(async move {
                    for _ in 0..100 {
                        counter.add_call(1, 2);
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
            assert_eq!(counter.llm_calling_times(), 800);
            assert_eq!(counter.total_input_token(), 800);
            assert_eq!(counter.total_output_token(), 1600);
        }
    }
}
