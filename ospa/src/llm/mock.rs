//! Scripted chat provider for tests.
//!
//! Returns queued replies in order and records every request it receives,
//! so tests can assert on both sides of the wire without a network.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::message::{Message, Role, ToolCall};
use crate::usage::Usage;

use super::chat::{ChatProvider, ChatRequest, ChatResponse};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A plain assistant text reply.
    Text(String),
    /// An assistant reply carrying tool calls.
    ToolCalls(Vec<ToolCall>),
    /// A failure surfaced from the provider.
    Error(Error),
}

/// A chat provider that replays scripted replies.
#[derive(Debug, Default)]
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    usage: Usage,
}

impl MockProvider {
    /// Create a provider with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            usage: Usage::new(10, 5),
        }
    }

    /// Set the usage reported with every reply.
    #[must_use]
    pub const fn usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Queue a plain text reply.
    pub fn push_text(&self, text: impl Into<String>) {
        self.push(MockReply::Text(text.into()));
    }

    /// Queue a reply with a single tool call.
    pub fn push_tool_call(&self, name: impl Into<String>, arguments: impl Into<String>) {
        let call = ToolCall::new("call_mock", name, arguments);
        self.push(MockReply::ToolCalls(vec![call]));
    }

    /// Queue a reply with several tool calls.
    pub fn push_tool_calls(&self, calls: Vec<ToolCall>) {
        self.push(MockReply::ToolCalls(calls));
    }

    /// Queue an error.
    pub fn push_error(&self, error: Error) {
        self.push(MockReply::Error(error));
    }

    /// Queue an arbitrary reply.
    pub fn push(&self, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| MockReply::Text("No scripted reply".to_owned()));

        match reply {
            MockReply::Text(text) => Ok(ChatResponse::from_text(text).with_usage(self.usage)),
            MockReply::ToolCalls(calls) => {
                let message = Message {
                    role: Role::Assistant,
                    role_name: None,
                    content: None,
                    tool_calls: Some(calls),
                    created_at: chrono::Utc::now(),
                };
                Ok(ChatResponse::new(message).with_usage(self.usage))
            }
            MockReply::Error(error) => Err(error),
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
