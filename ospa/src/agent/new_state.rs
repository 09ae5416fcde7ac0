//! Dynamic state creation for conversations without a predefined FSM.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::fsm::{Memory, State};
use crate::llm::LlmEngine;
use crate::setting::Setting;
use crate::usage::TokenCounter;

use super::base::Agent;

const AGENT_NAME: &str = "new_state_agent";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a professional state creation agent.
Your task is to analyze the conversation history and generate appropriate \
instructions for the next action when no predefined state machine exists.
You should focus on understanding the user's intent and providing clear, \
actionable guidance for the assistant's next response.
The recent actions are more important than previous actions.";

const DEFAULT_USER_TEMPLATE: &str = "\
You are a professional agent following this instruction:
{{ global_prompt }}

The recent actions are more important than previous actions.
Each step includes a timestamp and may contain a user_message.
To make the best decision, consider how recently each user_message was made.

History of steps:
{{ history }}

Now, you need to generate the assistant's instruction for the next action.
Please provide clear, specific guidance that will help the assistant \
respond appropriately to the user's needs.";

/// Agent that creates a state on the fly when the state machine is empty.
#[derive(Debug, Clone)]
pub struct NewStateAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl NewStateAgent {
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

    /// Produce a state with empty name and scenario whose instruction is
    /// the model's guidance for the next action.
    pub async fn step(
        &self,
        setting: &Setting,
        memory: &Memory,
        counter: Option<&TokenCounter>,
    ) -> Result<State> {
        let mut vars = Map::new();
        vars.insert(
            "global_prompt".to_owned(),
            Value::String(setting.global_prompt.clone()),
        );
        vars.insert(
            "history".to_owned(),
            Value::String(memory.print_history(setting.max_history_len)),
        );
        let context = self.agent.prepare_context(None, &vars)?;

        let instruction = self
            .engine
            .ask(&context, Some(setting.temperature), counter)
            .await?;
        tracing::debug!(
            target: "ospa::agent",
            instruction_len = instruction.len(),
            "created dynamic state"
        );

        Ok(State::new("", "", instruction))
    }
}
