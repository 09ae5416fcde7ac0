//! The engine layered over a chat provider: free text, tool calling, and
//! schema-constrained output, with token accounting and a per-config
//! singleton registry.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::AIContext;
use crate::setting::LlmSetting;
use crate::usage::TokenCounter;

use super::chat::{ChatProvider, ChatRequest, ChatResponse, ResponseFormat, ToolChoice, ToolSpec};
use super::json::parse_loose;
use super::openai::OpenAiProvider;

/// Registry key: one engine per provider configuration, so concurrent
/// agents share a connection pool but never mix credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EngineKey {
    model: String,
    base_url: String,
    api_key: String,
}

impl EngineKey {
    fn from_setting(setting: &LlmSetting) -> Self {
        Self {
            model: setting.model.clone(),
            base_url: setting.base_url.clone(),
            api_key: setting.api_key.clone(),
        }
    }
}

static ENGINES: LazyLock<Mutex<HashMap<EngineKey, Arc<LlmEngine>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Uniform LLM surface consumed by the agents.
///
/// Wraps a [`ChatProvider`] with the sampling defaults of its
/// configuration. Every completed provider call records one entry into the
/// [`TokenCounter`] the caller passed down, when one was passed.
#[derive(Debug)]
pub struct LlmEngine {
    provider: Arc<dyn ChatProvider>,
    model: String,
    temperature: f32,
    top_p: f32,
    max_completion_tokens: Option<u32>,
}

impl LlmEngine {
    /// Create an engine over an arbitrary provider (used directly by
    /// tests; production code goes through [`LlmEngine::get_or_create`]).
    #[must_use]
    pub fn with_provider(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            top_p: 1.0,
            max_completion_tokens: None,
        }
    }

    /// Set the default sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default nucleus sampling parameter.
    #[must_use]
    pub const fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Return the per-config singleton engine for `setting`, constructing
    /// it (and its HTTP client) on first use.
    pub fn get_or_create(setting: &LlmSetting) -> Result<Arc<Self>> {
        let key = EngineKey::from_setting(setting);
        let mut engines = ENGINES.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = engines.get(&key) {
            return Ok(Arc::clone(engine));
        }

        let provider = Arc::new(OpenAiProvider::new(setting.clone())?);
        let engine = Arc::new(Self {
            provider,
            model: setting.model.clone(),
            temperature: setting.temperature,
            top_p: setting.top_p,
            max_completion_tokens: Some(setting.max_completion_tokens),
        });
        engines.insert(key, Arc::clone(&engine));
        Ok(engine)
    }

    /// Release the singleton for `setting`. Returns whether one existed.
    pub fn clear(setting: &LlmSetting) -> bool {
        let key = EngineKey::from_setting(setting);
        ENGINES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    /// Release every registered engine. Returns how many were removed.
    pub fn clear_all() -> usize {
        let mut engines = ENGINES.lock().unwrap_or_else(PoisonError::into_inner);
        let count = engines.len();
        engines.clear();
        count
    }

    /// The model this engine targets.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn base_request(&self, context: &AIContext, temperature: Option<f32>) -> ChatRequest {
        let mut request = ChatRequest::new(self.model.clone())
            .messages(context.to_wire_format())
            .temperature(temperature.unwrap_or(self.temperature))
            .top_p(self.top_p);
        if let Some(max) = self.max_completion_tokens {
            request = request.max_completion_tokens(max);
        }
        request
    }

    async fn send(
        &self,
        request: &ChatRequest,
        counter: Option<&TokenCounter>,
    ) -> Result<ChatResponse> {
        let response = self.provider.chat(request).await?;
        if let Some(counter) = counter {
            counter.add_usage(response.usage.unwrap_or_default());
        }
        Ok(response)
    }

    /// Free-text completion: returns the full assistant text.
    pub async fn ask(
        &self,
        context: &AIContext,
        temperature: Option<f32>,
        counter: Option<&TokenCounter>,
    ) -> Result<String> {
        let request = self.base_request(context, temperature);
        let response = self.send(&request, counter).await?;
        Ok(response.text())
    }

    /// Tool-calling completion.
    ///
    /// The returned response may carry `tool_calls`; when the model chose
    /// no tool, its `content` is the plain reply.
    pub async fn ask_tool(
        &self,
        context: &AIContext,
        tools: Vec<ToolSpec>,
        tool_choice: ToolChoice,
        counter: Option<&TokenCounter>,
    ) -> Result<ChatResponse> {
        let request = self
            .base_request(context, None)
            .tools(tools)
            .tool_choice(&tool_choice);
        self.send(&request, counter).await
    }

    /// Schema-constrained completion, deserialized into `T`.
    ///
    /// A malformed reply gets one local repair round ("return JSON that
    /// matches this shape") before [`Error::SchemaViolation`] is raised.
    pub async fn structured_output<T>(
        &self,
        context: &AIContext,
        counter: Option<&TokenCounter>,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned + schemars::JsonSchema,
    {
        let format = ResponseFormat::from_type::<T>();
        let request = self.base_request(context, None).response_format(&format);
        let reply = self.send(&request, counter).await?.text();

        if let Some(value) = parse_loose(&reply)
            && let Ok(parsed) = serde_json::from_value::<T>(value)
        {
            return Ok(parsed);
        }

        tracing::debug!(target: "ospa::llm", "structured output mismatch, attempting repair");
        let repaired = self.repair(context, &reply, &format, counter).await?;
        parse_loose(&repaired)
            .and_then(|value| serde_json::from_value::<T>(value).ok())
            .ok_or_else(|| Error::schema(format_name(&format), repaired))
    }

    /// JSON-mode completion returning the raw value; shape normalization
    /// is left to the caller.
    pub async fn structured_json(
        &self,
        context: &AIContext,
        counter: Option<&TokenCounter>,
    ) -> Result<Value> {
        let format = ResponseFormat::JsonObject;
        let request = self.base_request(context, None).response_format(&format);
        let reply = self.send(&request, counter).await?.text();

        if let Some(value) = parse_loose(&reply) {
            return Ok(value);
        }

        tracing::debug!(target: "ospa::llm", "json output unparsable, attempting repair");
        let repaired = self.repair(context, &reply, &format, counter).await?;
        parse_loose(&repaired).ok_or_else(|| Error::schema("a JSON value", repaired))
    }

    /// One follow-up call asking the model to reshape its own reply.
    async fn repair(
        &self,
        context: &AIContext,
        reply: &str,
        format: &ResponseFormat,
        counter: Option<&TokenCounter>,
    ) -> Result<String> {
        let mut repair_context = context.clone();
        repair_context.add_assistant(reply.to_owned());
        repair_context.add_user_prompt(match format {
            ResponseFormat::JsonObject => {
                "The previous reply was not valid JSON. Return only the same \
                 content as a valid JSON value, with no surrounding text."
                    .to_owned()
            }
            ResponseFormat::JsonSchema { schema, .. } => format!(
                "The previous reply did not match the required shape. Return \
                 only JSON that matches this schema, with no surrounding \
                 text:\n{}",
                serde_json::to_string(schema).unwrap_or_default()
            ),
        });

        let request = self
            .base_request(&repair_context, None)
            .response_format(format);
        Ok(self.send(&request, counter).await?.text())
    }
}

fn format_name(format: &ResponseFormat) -> String {
    match format {
        ResponseFormat::JsonObject => "a JSON value".to_owned(),
        ResponseFormat::JsonSchema { name, .. } => format!("JSON matching schema '{name}'"),
    }
}
