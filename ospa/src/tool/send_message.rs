//! The distinguished yield-to-user tool.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ToolError;

use super::{SEND_MESSAGE_TOOL_NAME, Tool};

/// Tool that surfaces a message to the user and yields the turn.
///
/// Executing it performs no I/O: it returns the sentinel
/// `{"user_message": ""}`, meaning the runtime is now waiting for the
/// user. Execution is idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendMessageToUser;

#[async_trait]
impl Tool for SendMessageToUser {
    fn name(&self) -> String {
        SEND_MESSAGE_TOOL_NAME.to_owned()
    }

    fn description(&self) -> String {
        "Send a message to the user.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_message": {
                    "type": "string",
                    "description": "The message to send to the user. Can be an \
                                    empty string if you are passively waiting.",
                },
            },
            "required": [],
            "additionalProperties": false,
        })
    }

    async fn execute(
        &self,
        _args: Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, ToolError> {
        // Empty user_message: the turn now waits for the user to speak.
        let mut result = Map::new();
        result.insert("user_message".to_owned(), Value::String(String::new()));
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_sentinel_regardless_of_arguments() {
        let tool = SendMessageToUser;
        let mut args = Map::new();
        args.insert(
            "agent_message".to_owned(),
            Value::String("hello".to_owned()),
        );

        let first = tool.execute(args.clone()).await.unwrap();
        let second = tool.execute(args).await.unwrap();
        let empty = tool.execute(Map::new()).await.unwrap();

        assert_eq!(first["user_message"], "");
        assert_eq!(first, second);
        assert_eq!(first, empty);
    }

    #[test]
    fn schema_declares_agent_message() {
        let schema = SendMessageToUser.parameters_schema();
        assert!(schema["properties"]["agent_message"].is_object());
        assert_eq!(schema["required"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn calling_schema_is_function_envelope() {
        let envelope = SendMessageToUser.calling_schema();
        assert_eq!(envelope["type"], "function");
        assert_eq!(envelope["function"]["name"], SEND_MESSAGE_TOOL_NAME);
    }
}
