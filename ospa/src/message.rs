//! Message types and the ordered conversation context.
//!
//! [`Message`] follows the chat-completions conventions: a role, content
//! that is either a single string or an ordered sequence of typed parts,
//! and a creation timestamp. [`AIContext`] is the append-only sequence of
//! messages an agent step builds up before rendering it to the provider
//! wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One typed piece of message content. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Markdown text, fenced when flattened to the wire.
    Markdown {
        /// The markdown source.
        markdown: String,
    },
    /// Structured JSON, rendered as a compact canonical string.
    Json {
        /// The JSON value.
        json: Value,
    },
}

impl ContentPart {
    /// Create a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a markdown part.
    #[must_use]
    pub fn markdown(markdown: impl Into<String>) -> Self {
        Self::Markdown {
            markdown: markdown.into(),
        }
    }

    /// Create a JSON part.
    #[must_use]
    pub const fn json(json: Value) -> Self {
        Self::Json { json }
    }

    /// Flatten this part to wire text, by type-appropriate concatenation.
    #[must_use]
    pub fn to_wire_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Markdown { markdown } => format!("```markdown\n{markdown}\n```"),
            Self::Json { json } => serde_json::to_string(json).unwrap_or_default(),
        }
    }
}

/// Message content: a single string or an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// A single text string.
    Text(String),
    /// An ordered sequence of typed parts.
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Flatten the content to a single wire string.
    #[must_use]
    pub fn to_wire_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(ContentPart::to_wire_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for the tool call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments as a JSON string, exactly as the provider returned them.
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments string into a JSON value. An empty string
    /// parses to an empty object.
    pub fn parse_arguments(&self) -> serde_json::Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Optional display name of the sender within its role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    /// Content of the message. Absent for pure tool-call messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Tool calls requested by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with the given role and content.
    #[must_use]
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            role_name: None,
            content: Some(content.into()),
            tool_calls: None,
            created_at: Utc::now(),
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Set the role name.
    #[must_use]
    pub fn with_role_name(mut self, name: impl Into<String>) -> Self {
        self.role_name = Some(name.into());
        self
    }

    /// Flattened text content, empty when there is none.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .as_ref()
            .map(Content::to_wire_text)
            .unwrap_or_default()
    }

    /// Whether the message carries at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// Ordered sequence of messages. Appending is the only mutation;
/// rendering preserves strict insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AIContext {
    messages: Vec<Message>,
}

impl AIContext {
    /// Create an empty context.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append a system prompt.
    pub fn add_system_prompt(&mut self, content: impl Into<Content>) {
        self.messages.push(Message::system(content));
    }

    /// Append a user prompt.
    pub fn add_user_prompt(&mut self, content: impl Into<Content>) {
        self.messages.push(Message::user(content));
    }

    /// Append an assistant reply.
    pub fn add_assistant(&mut self, content: impl Into<Content>) {
        self.messages.push(Message::assistant(content));
    }

    /// Append an arbitrary message.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The messages in insertion order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the context holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render to the provider's chat message array: one `{role, content}`
    /// object per message, composite parts flattened to text.
    #[must_use]
    pub fn to_wire_format(&self) -> Vec<Value> {
        self.messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.text(),
                })
            })
            .collect()
    }
}
