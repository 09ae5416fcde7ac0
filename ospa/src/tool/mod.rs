//! Tools: the capability interface, the per-request registry, and the
//! action executor.
//!
//! A tool declares its argument schema and an async `execute`. The
//! registry enforces name uniqueness and always contains the
//! distinguished [`SendMessageToUser`] yield-to-user tool. The executor
//! completes actions and contains every tool failure inside the action's
//! result; it never fails the turn.

mod http;
mod send_message;

pub use http::{RequestMethod, RequestTool};
pub use send_message::SendMessageToUser;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result, ToolError};
use crate::fsm::Action;
use crate::llm::ToolSpec;

/// Name of the distinguished yield-to-user tool.
pub const SEND_MESSAGE_TOOL_NAME: &str = "send_message_to_user";

/// A capability with a declared argument schema and an execute operation.
#[async_trait]
pub trait Tool: Send + Sync + std::fmt::Debug {
    /// Tool name, unique within one registry.
    fn name(&self) -> String;

    /// Tool description shown to the model.
    fn description(&self) -> String;

    /// JSON Schema for the tool's arguments.
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false,
        })
    }

    /// The provider's function-calling envelope for this tool.
    fn calling_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters_schema(),
            },
        })
    }

    /// Execute the tool with the model-supplied arguments.
    async fn execute(&self, args: Map<String, Value>) -> std::result::Result<Map<String, Value>, ToolError>;
}

/// Per-request mapping of tool name to tool.
///
/// [`SendMessageToUser`] is always present; registering a second tool
/// under an existing name fails with [`Error::DuplicateToolName`].
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a registry holding only the yield-to-user tool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: vec![Arc::new(SendMessageToUser)],
        }
    }

    /// Build a registry from request-supplied tools.
    ///
    /// Verifies name uniqueness across the whole set (including the
    /// implicit `send_message_to_user`) before anything else runs.
    pub fn from_request_tools(tools: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool, failing on a duplicate name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name();
        if self.contains(&name) {
            return Err(Error::duplicate_tool(name));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Registered tool names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty (never true in practice).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The wire tool specs for an `ask_tool` call, in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec::new(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }

    /// Execute one action and complete it.
    ///
    /// Looks up the action's tool, validates the arguments against the
    /// schema's required list, and invokes it. Failures of any kind are
    /// captured as `{"error": ...}` in the result; the action is completed
    /// either way and this method never returns an error.
    pub async fn execute_action(&self, action: &mut Action) {
        let result = match self.get(&action.name) {
            None => Err(ToolError::execution(format!(
                "unknown tool '{}'",
                action.name
            ))),
            Some(tool) => match validate_arguments(&tool.parameters_schema(), &action.arguments) {
                Err(err) => Err(err),
                Ok(()) => tool.execute(action.arguments.clone()).await,
            },
        };

        action.result = Some(match result {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(
                    target: "ospa::tool",
                    tool = %action.name,
                    error = %err,
                    "tool execution failed"
                );
                let mut map = Map::new();
                map.insert("error".to_owned(), Value::String(err.to_string()));
                map
            }
        });
    }
}

/// Check that every key in the schema's `required` list is present.
fn validate_arguments(
    schema: &Value,
    args: &Map<String, Value>,
) -> std::result::Result<(), ToolError> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    let missing: Vec<&str> = required
        .iter()
        .filter_map(Value::as_str)
        .filter(|key| !args.contains_key(*key))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::invalid_arguments(format!(
            "missing required arguments: {missing:?}"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> String {
            "echo".to_owned()
        }

        fn description(&self) -> String {
            "Echo the input back.".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
                "additionalProperties": false,
            })
        }

        async fn execute(
            &self,
            args: Map<String, Value>,
        ) -> std::result::Result<Map<String, Value>, ToolError> {
            Ok(args)
        }
    }

    #[derive(Debug)]
    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> String {
            "failing".to_owned()
        }

        fn description(&self) -> String {
            "Always fails.".to_owned()
        }

        async fn execute(
            &self,
            _args: Map<String, Value>,
        ) -> std::result::Result<Map<String, Value>, ToolError> {
            Err(ToolError::execution("boom"))
        }
    }

    #[test]
    fn registry_always_has_send_message() {
        let registry = ToolRegistry::new();
        assert!(registry.contains(SEND_MESSAGE_TOOL_NAME));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, Error::DuplicateToolName { name } if name == "echo"));
    }

    #[test]
    fn duplicate_send_message_is_rejected() {
        let err = ToolRegistry::from_request_tools(vec![Arc::new(SendMessageToUser)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateToolName { .. }));
    }

    #[test]
    fn specs_follow_registration_order() {
        let registry = ToolRegistry::from_request_tools(vec![Arc::new(EchoTool)]).unwrap();
        let specs = registry.specs();
        assert_eq!(specs[0].name, SEND_MESSAGE_TOOL_NAME);
        assert_eq!(specs[1].name, "echo");
    }

    #[tokio::test]
    async fn execute_completes_successful_action() {
        let registry = ToolRegistry::from_request_tools(vec![Arc::new(EchoTool)]).unwrap();
        let mut args = Map::new();
        args.insert("text".to_owned(), Value::String("hi".to_owned()));
        let mut action = Action::new("echo", args);

        registry.execute_action(&mut action).await;

        assert!(action.is_completed());
        assert_eq!(action.result.unwrap()["text"], "hi");
    }

    #[tokio::test]
    async fn execute_contains_missing_arguments() {
        let registry = ToolRegistry::from_request_tools(vec![Arc::new(EchoTool)]).unwrap();
        let mut action = Action::new("echo", Map::new());

        registry.execute_action(&mut action).await;

        let result = action.result.unwrap();
        assert!(result["error"].as_str().unwrap().contains("text"));
    }

    #[tokio::test]
    async fn execute_contains_tool_failure() {
        let registry = ToolRegistry::from_request_tools(vec![Arc::new(FailingTool)]).unwrap();
        let mut action = Action::new("failing", Map::new());

        registry.execute_action(&mut action).await;

        assert_eq!(action.result.unwrap()["error"], "boom");
    }

    #[tokio::test]
    async fn execute_contains_unknown_tool() {
        let registry = ToolRegistry::new();
        let mut action = Action::new("nope", Map::new());

        registry.execute_action(&mut action).await;

        assert!(action.is_completed());
        assert!(
            action.result.unwrap()["error"]
                .as_str()
                .unwrap()
                .contains("unknown tool")
        );
    }
}
