//! Chat request/response types and the provider trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;
use crate::usage::Usage;

/// A tool exposed to the model for function calling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name, unique within one request.
    pub name: String,
    /// Tool description shown to the model.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

impl ToolSpec {
    /// Create a new tool spec.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Wrap the spec in the provider's function-calling envelope.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Controls how the model uses tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model decides whether to use tools.
    #[default]
    Auto,
    /// Model must use at least one tool.
    Required,
    /// Model must call the named tool.
    Named(String),
}

impl ToolChoice {
    /// Convert to the wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Auto => Value::String("auto".to_owned()),
            Self::Required => Value::String("required".to_owned()),
            Self::Named(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        }
    }
}

impl From<&str> for ToolChoice {
    fn from(s: &str) -> Self {
        match s {
            "auto" => Self::Auto,
            "required" => Self::Required,
            name => Self::Named(name.to_owned()),
        }
    }
}

/// Response format specification for JSON mode / structured outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Any JSON object.
    JsonObject,
    /// JSON constrained by a schema.
    JsonSchema {
        /// Schema name.
        name: String,
        /// JSON Schema definition.
        schema: Value,
    },
}

impl ResponseFormat {
    /// Build a schema-constrained format from a Rust type.
    #[must_use]
    pub fn from_type<T: schemars::JsonSchema>() -> Self {
        let (name, schema) = generate_json_schema::<T>();
        Self::JsonSchema { name, schema }
    }

    /// Convert to the wire value.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::JsonObject => serde_json::json!({ "type": "json_object" }),
            Self::JsonSchema { name, schema } => serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "schema": schema,
                    "strict": true,
                }
            }),
        }
    }
}

/// Generate a JSON Schema from a Rust type implementing
/// [`schemars::JsonSchema`].
///
/// Returns `(name, schema)` with the `$schema` meta field removed; the
/// chat-completions endpoint does not need it.
#[must_use]
pub fn generate_json_schema<T: schemars::JsonSchema>() -> (String, Value) {
    let root = schemars::schema_for!(T);
    let mut schema_value = serde_json::to_value(&root).unwrap_or_default();

    if let Value::Object(ref mut map) = schema_value {
        map.remove("$schema");
    }

    let name = <T as schemars::JsonSchema>::schema_name();
    (name.into_owned(), schema_value)
}

/// A chat completion request.
///
/// `messages` is the already-rendered wire array (`{role, content}` per
/// message, in insertion order) produced by
/// [`AIContext::to_wire_format`](crate::message::AIContext::to_wire_format).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,

    /// Conversation messages in wire form.
    pub messages: Vec<Value>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum completion tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,

    /// Tools available for the model to call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,

    /// How the model should use the tools, in wire form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Response format specification, in wire form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

impl ChatRequest {
    /// Create a request for the given model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the wire messages.
    #[must_use]
    pub fn messages(mut self, messages: Vec<Value>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the nucleus sampling parameter.
    #[must_use]
    pub const fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set the completion token cap.
    #[must_use]
    pub const fn max_completion_tokens(mut self, tokens: u32) -> Self {
        self.max_completion_tokens = Some(tokens);
        self
    }

    /// Set the tools.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the tool choice.
    #[must_use]
    pub fn tool_choice(mut self, choice: &ToolChoice) -> Self {
        self.tool_choice = Some(choice.to_value());
        self
    }

    /// Set the response format.
    #[must_use]
    pub fn response_format(mut self, format: &ResponseFormat) -> Self {
        self.response_format = Some(format.to_wire());
        self
    }
}

/// A chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated assistant message.
    pub message: Message,

    /// Token usage for this call, when the provider reported it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Model identifier used for this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatResponse {
    /// Create a response from an assistant message.
    #[must_use]
    pub const fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
            model: None,
        }
    }

    /// Create a plain-text response.
    #[must_use]
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::new(Message::assistant(content.into()))
    }

    /// Attach usage statistics.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// The flattened text content.
    #[must_use]
    pub fn text(&self) -> String {
        self.message.text()
    }

    /// Whether the model requested tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }

    /// The tool calls, empty when none were requested.
    #[must_use]
    pub fn tool_calls(&self) -> &[crate::message::ToolCall] {
        self.message.tool_calls.as_deref().unwrap_or_default()
    }
}

/// Trait for providers that support chat completions.
///
/// This is the only operation a backend must implement; everything else
/// ([`LlmEngine`](crate::llm::LlmEngine)'s ask/tool/structured surface) is
/// layered on top of it.
#[async_trait]
pub trait ChatProvider: Send + Sync + std::fmt::Debug {
    /// Send a chat completion request and receive the full response.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Name of this provider, for error messages and logging.
    fn provider_name(&self) -> &'static str;
}
