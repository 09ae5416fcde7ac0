//! Action selection: translate the current state and history into the
//! turn's tool invocations.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::feedback::Feedback;
use crate::fsm::{Action, Memory, State};
use crate::llm::{LlmEngine, ToolChoice};
use crate::setting::Setting;
use crate::tool::ToolRegistry;
use crate::usage::TokenCounter;

use super::base::Agent;
use super::render_feedbacks;

const AGENT_NAME: &str = "select_actions_agent";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a professional action selection agent.
Decide what the assistant should do next by calling the available tools.
Use send_message_to_user when the next move is to speak to the user.
The recent actions are more important than previous actions.";

const DEFAULT_USER_TEMPLATE: &str = "\
You are a professional agent following this instruction:
{{ global_prompt }}

Current guidance for this state:
{{ instruction }}

The recent actions are more important than previous actions.
Each step includes a timestamp and may contain a user_message.

History of steps:
{{ history }}

Relevant past examples:
{{ feedbacks }}

Select the tool calls for the next step.";

/// Agent that selects the pending actions for one step.
#[derive(Debug, Clone)]
pub struct SelectActionsAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl SelectActionsAgent {
    /// Create (or fetch) the agent and point it at `engine`. The handle
    /// is captured here for the lifetime of this value.
    pub fn new(engine: Arc<LlmEngine>) -> Result<Self> {
        let agent = Agent::get_or_create(
            AGENT_NAME,
            Arc::clone(&engine),
            DEFAULT_SYSTEM_PROMPT,
            DEFAULT_USER_TEMPLATE,
        )?;
        agent.set_engine(Arc::clone(&engine));
        Ok(Self { agent, engine })
    }

    /// Select the pending actions for the current state.
    ///
    /// Each tool call the model returns becomes one pending [`Action`].
    /// When the model answers with plain content instead, a single
    /// `send_message_to_user` action carrying that content is synthesized,
    /// so the produced sequence is never empty.
    pub async fn step(
        &self,
        setting: &Setting,
        memory: &Memory,
        tools: &ToolRegistry,
        current_state: &State,
        feedbacks: &[Feedback],
        counter: Option<&TokenCounter>,
    ) -> Result<Vec<Action>> {
        let mut vars = Map::new();
        vars.insert(
            "global_prompt".to_owned(),
            Value::String(setting.global_prompt.clone()),
        );
        vars.insert(
            "instruction".to_owned(),
            Value::String(current_state.instruction.clone()),
        );
        vars.insert(
            "history".to_owned(),
            Value::String(memory.print_history(setting.max_history_len)),
        );
        vars.insert(
            "feedbacks".to_owned(),
            Value::String(render_feedbacks(feedbacks)),
        );
        let context = self.agent.prepare_context(None, &vars)?;

        let response = self
            .engine
            .ask_tool(&context, tools.specs(), ToolChoice::Auto, counter)
            .await?;

        let mut actions = Vec::new();
        for call in response.tool_calls() {
            let arguments = match call.parse_arguments() {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        target: "ospa::agent",
                        tool = %call.name,
                        "tool call arguments were not a JSON object"
                    );
                    Map::new()
                }
            };
            actions.push(Action::new(call.name.clone(), arguments));
        }

        if actions.is_empty() {
            // Plain reply, or nothing at all: surface it to the user.
            actions.push(Action::send_message(response.text()));
        }

        Ok(actions)
    }
}
