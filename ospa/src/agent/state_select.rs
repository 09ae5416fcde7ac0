//! State selection: pick the next FSM state for a turn.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::feedback::Feedback;
use crate::fsm::{Memory, State};
use crate::llm::LlmEngine;
use crate::setting::Setting;
use crate::usage::TokenCounter;

use super::base::Agent;
use super::render_feedbacks;

const AGENT_NAME: &str = "state_select_agent";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a professional state selection agent.
Your task is to analyze the conversation history and choose the single \
most appropriate next state from the allowed set.
The recent actions are more important than previous actions.";

const DEFAULT_USER_TEMPLATE: &str = "\
You are a professional agent following this instruction:
{{ global_prompt }}

The recent actions are more important than previous actions.
Each step includes a timestamp and may contain a user_message.

History of steps:
{{ history }}

Allowed next states:
{{ allowed_states }}

Relevant past examples:
{{ feedbacks }}

Choose exactly one state from the allowed set and return its name as \
JSON: {\"state_name\": \"...\"}.";

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct StateChoice {
    state_name: String,
}

/// Agent that selects the next state from the allowed transition set.
#[derive(Debug, Clone)]
pub struct StateSelectAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl StateSelectAgent {
    /// Create (or fetch) the agent and point it at `engine`. The handle
    /// is captured here; steps keep using it even if the agent is
    /// re-pointed later.
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

    /// Select the next state.
    ///
    /// Fast path: an empty memory selects the initial state without any
    /// LLM call. Otherwise the model picks from the allowed set; a name
    /// outside the set is retried once, and a second failure falls back
    /// to the current state.
    pub async fn step(
        &self,
        setting: &Setting,
        memory: &Memory,
        feedbacks: &[Feedback],
        counter: Option<&TokenCounter>,
    ) -> Result<State> {
        let machine = &setting.state_machine;
        let initial = machine
            .initial_state()
            .ok_or_else(|| Error::config("state selection requires a non-empty state machine"))?;

        if memory.is_empty() {
            return Ok(initial.clone());
        }

        let current_name = memory
            .current_state_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(&machine.initial_state_name);
        let allowed = machine.next_allowed_states(current_name);
        if allowed.is_empty() {
            // No outgoing transition is configured; stay where we are.
            let state = machine.state(current_name).unwrap_or(initial);
            return Ok(state.clone());
        }
        if allowed.len() == 1 {
            return Ok(allowed[0].clone());
        }

        let allowed_rendered = allowed
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.scenario))
            .collect::<Vec<_>>()
            .join("\n");
        let mut vars = Map::new();
        vars.insert(
            "global_prompt".to_owned(),
            Value::String(setting.global_prompt.clone()),
        );
        vars.insert(
            "history".to_owned(),
            Value::String(memory.print_history(setting.max_history_len)),
        );
        vars.insert(
            "allowed_states".to_owned(),
            Value::String(allowed_rendered),
        );
        vars.insert(
            "feedbacks".to_owned(),
            Value::String(render_feedbacks(feedbacks)),
        );
        let context = self.agent.prepare_context(None, &vars)?;

        for attempt in 0..2 {
            let choice: StateChoice = self.engine.structured_output(&context, counter).await?;
            if let Some(state) = allowed.iter().find(|s| s.name == choice.state_name) {
                return Ok((*state).clone());
            }
            tracing::warn!(
                target: "ospa::agent",
                attempt,
                got = %choice.state_name,
                "state selection outside allowed set"
            );
        }

        // Two misses: fall back to the current state.
        if let Some(state) = machine.state(current_name) {
            return Ok(state.clone());
        }
        Err(Error::invalid_state(
            current_name,
            allowed.iter().map(|s| s.name.clone()).collect(),
        ))
    }
}
