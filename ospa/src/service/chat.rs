//! The chat step loop: one conversational turn from user message to
//! assistant reply.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::{NewStateAgent, SelectActionsAgent, StateSelectAgent};
use crate::error::{Error, Result};
use crate::feedback::Feedback;
use crate::fsm::{Action, Memory, State, Step};
use crate::llm::LlmEngine;
use crate::setting::Setting;
use crate::tool::{Tool, ToolRegistry};
use crate::usage::TokenCounter;

use super::{CancelFlag, FeedbackRecall};

/// Outcome classification of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    /// The turn completed and memory was advanced.
    Success,
    /// The turn was cancelled; memory is unchanged.
    Cancelled,
    /// The turn failed; memory is unchanged.
    Error,
}

/// One turn's input.
#[derive(Debug, Default)]
pub struct ChatTurnRequest {
    /// The user's message for this turn.
    pub user_message: String,
    /// Replace the last assistant message before proceeding.
    pub edited_last_response: Option<String>,
    /// Drop the last user turn from memory before proceeding.
    pub recall_last_user_message: bool,
    /// Per-request configuration.
    pub settings: Setting,
    /// The conversation memory, owned by the caller.
    pub memory: Memory,
    /// Tools offered for this request (besides `send_message_to_user`).
    pub request_tools: Vec<Arc<dyn Tool>>,
    /// Cooperative cancellation handle.
    pub cancel: CancelFlag,
}

/// One turn's output envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnResponse {
    /// The assistant message to surface; absent when cancelled.
    pub response: Option<String>,
    /// The advanced (or, on failure, unchanged) memory.
    pub memory: Memory,
    /// Outcome classification.
    pub result_type: ResultType,
    /// Number of LLM calls made during the turn.
    pub llm_calling_times: u64,
    /// Input tokens consumed during the turn.
    pub total_input_token: u64,
    /// Output tokens consumed during the turn.
    pub total_output_token: u64,
}

/// The top-level orchestrator of one conversational turn.
#[derive(Debug, Default)]
pub struct ChatService {
    recall: Option<Arc<dyn FeedbackRecall>>,
    engine_override: Option<Arc<LlmEngine>>,
}

impl ChatService {
    /// Create a service without feedback recall.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a feedback recall source.
    #[must_use]
    pub fn with_recall(mut self, recall: Arc<dyn FeedbackRecall>) -> Self {
        self.recall = Some(recall);
        self
    }

    /// Use a fixed engine instead of resolving one from the request
    /// settings. Tests use this to route turns through a scripted
    /// provider.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<LlmEngine>) -> Self {
        self.engine_override = Some(engine);
        self
    }

    /// Run one turn.
    ///
    /// Never fails outright: errors and cancellations are folded into the
    /// response envelope with the caller's memory unchanged.
    pub async fn chat_turn(&self, request: ChatTurnRequest) -> ChatTurnResponse {
        let counter = TokenCounter::new();
        let original_memory = request.memory.clone();
        let agent_name = request.settings.agent_name.clone();

        let outcome = self.run_turn(request, &counter).await;
        let snapshot = counter.snapshot();
        match outcome {
            Ok((response, memory)) => ChatTurnResponse {
                response: Some(response),
                memory,
                result_type: ResultType::Success,
                llm_calling_times: snapshot.llm_calling_times,
                total_input_token: snapshot.total_input_token,
                total_output_token: snapshot.total_output_token,
            },
            Err(Error::Cancelled) => {
                tracing::info!(target: "ospa::service", agent = %agent_name, "turn cancelled");
                ChatTurnResponse {
                    response: None,
                    memory: original_memory,
                    result_type: ResultType::Cancelled,
                    llm_calling_times: snapshot.llm_calling_times,
                    total_input_token: snapshot.total_input_token,
                    total_output_token: snapshot.total_output_token,
                }
            }
            Err(err) => {
                tracing::error!(target: "ospa::service", agent = %agent_name, error = %err, "turn failed");
                ChatTurnResponse {
                    response: Some(err.to_string()),
                    memory: original_memory,
                    result_type: ResultType::Error,
                    llm_calling_times: snapshot.llm_calling_times,
                    total_input_token: snapshot.total_input_token,
                    total_output_token: snapshot.total_output_token,
                }
            }
        }
    }

    async fn run_turn(
        &self,
        request: ChatTurnRequest,
        counter: &TokenCounter,
    ) -> Result<(String, Memory)> {
        let ChatTurnRequest {
            user_message,
            edited_last_response,
            recall_last_user_message,
            settings,
            mut memory,
            request_tools,
            cancel,
        } = request;

        settings.validate()?;
        // Duplicate-tool guard: fails before any LLM call is made.
        let registry = ToolRegistry::from_request_tools(request_tools)?;

        let engine = match &self.engine_override {
            Some(engine) => Arc::clone(engine),
            None => LlmEngine::get_or_create(&settings.llm_setting())?,
        };

        cancel.checkpoint()?;

        // 1. Memory-initialize: an empty memory gets the greeting step and
        //    the turn ends there. The greeting is phrased by SelectActions
        //    on the initial state, offered only the yield-to-user tool.
        if memory.is_empty() {
            let initial_state = settings.state_machine.initial_state().cloned().unwrap_or_else(
                || {
                    State::new(
                        "",
                        "",
                        "The conversation is just starting. Greet the user in \
                         one or two sentences, consistent with your role, and \
                         invite them to speak.",
                    )
                },
            );
            let select_actions = SelectActionsAgent::new(Arc::clone(&engine))?;
            let greeting_registry = ToolRegistry::new();
            let pending = select_actions
                .step(&settings, &memory, &greeting_registry, &initial_state, &[], Some(counter))
                .await?;

            let mut executed: Vec<Action> = Vec::new();
            for mut action in pending {
                cancel.checkpoint()?;
                greeting_registry.execute_action(&mut action).await;
                let yields = action.is_send_message();
                executed.push(action);
                if yields {
                    break;
                }
            }
            let greeting = executed
                .iter()
                .rev()
                .find(|a| a.is_send_message())
                .and_then(Action::agent_message)
                .unwrap_or_default()
                .to_owned();
            memory.push(Step::new(initial_state.name.clone(), executed));
            return Ok((greeting, memory));
        }

        // 2. Ingest: memory surgery or normal observation update.
        if recall_last_user_message {
            if let Some(action) = memory.last_send_message_mut()
                && let Some(result) = action.result.as_mut()
            {
                result.insert(
                    "user_message".to_owned(),
                    serde_json::Value::String(String::new()),
                );
            }
        } else if let Some(edited) = edited_last_response {
            if let Some(action) = memory.last_send_message_mut() {
                action
                    .arguments
                    .insert("agent_message".to_owned(), serde_json::Value::String(edited));
            }
        } else if let Some(action) = memory.last_send_message_mut() {
            if let Some(result) = action.result.as_mut() {
                result.insert(
                    "user_message".to_owned(),
                    serde_json::Value::String(user_message.clone()),
                );
            }
        }

        cancel.checkpoint()?;

        // 3. Recall feedback for the fresh observation. Runs ahead of
        //    state selection so the exemplars reach both StateSelect and
        //    SelectActions.
        let feedbacks = match (&self.recall, settings.top_k) {
            (Some(recall), top_k) if top_k > 0 => {
                recall
                    .recall(&settings.agent_name, &user_message, top_k)
                    .await?
            }
            _ => Vec::new(),
        };

        cancel.checkpoint()?;

        // 4. Select the next state.
        let state = self
            .select_state(&settings, &memory, &feedbacks, &engine, counter)
            .await?;

        cancel.checkpoint()?;

        // 5. Select actions.
        let select_actions = SelectActionsAgent::new(Arc::clone(&engine))?;
        let pending = select_actions
            .step(&settings, &memory, &registry, &state, &feedbacks, Some(counter))
            .await?;

        // 6. Execute in order; the turn yields after the first
        //    send_message_to_user action.
        let mut executed: Vec<Action> = Vec::new();
        for mut action in pending {
            cancel.checkpoint()?;
            registry.execute_action(&mut action).await;
            let yields = action.is_send_message();
            executed.push(action);
            if yields {
                break;
            }
        }

        // 7. Persist the step.
        let response = executed
            .iter()
            .rev()
            .find(|a| a.is_send_message())
            .and_then(Action::agent_message)
            .unwrap_or_default()
            .to_owned();
        memory.push(Step::new(state.name.clone(), executed));

        // 8. Surface the assistant message.
        Ok((response, memory))
    }

    /// Route to the FSM selector or, for an empty machine, to dynamic
    /// state creation.
    async fn select_state(
        &self,
        settings: &Setting,
        memory: &Memory,
        feedbacks: &[Feedback],
        engine: &Arc<LlmEngine>,
        counter: &TokenCounter,
    ) -> Result<State> {
        if settings.state_machine.is_empty() {
            let new_state = NewStateAgent::new(Arc::clone(engine))?;
            return new_state.step(settings, memory, Some(counter)).await;
        }
        let state_select = StateSelectAgent::new(Arc::clone(engine))?;
        state_select
            .step(settings, memory, feedbacks, Some(counter))
            .await
    }
}
