//! LLM client layer.
//!
//! The contract is split the same way the runtime consumes it:
//! [`ChatProvider`](chat::ChatProvider) is the minimal provider wire
//! (one chat-completions call), [`OpenAiProvider`](openai::OpenAiProvider)
//! implements it over an OpenAI-compatible endpoint, and
//! [`LlmEngine`](engine::LlmEngine) layers the three capabilities the
//! agents use (free text, tool calling, schema-constrained output) plus
//! token accounting and the per-config singleton registry on top.

pub mod chat;
pub mod engine;
pub mod json;
pub mod mock;
pub mod openai;

pub use chat::{ChatProvider, ChatRequest, ChatResponse, ResponseFormat, ToolChoice, ToolSpec};
pub use engine::LlmEngine;
pub use mock::{MockProvider, MockReply};
pub use openai::OpenAiProvider;
