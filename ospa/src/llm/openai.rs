//! OpenAI-compatible chat-completions provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::message::{Content, Message, Role, ToolCall};
use crate::setting::LlmSetting;
use crate::usage::Usage;

use super::chat::{ChatProvider, ChatRequest, ChatResponse};

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    setting: LlmSetting,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    message: String,
}

impl OpenAiProvider {
    /// Create a provider from an [`LlmSetting`].
    pub fn new(setting: LlmSetting) -> Result<Self> {
        setting.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(setting.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { setting, client })
    }

    /// Create a provider from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(LlmSetting::from_env()?)
    }

    /// The configured default model.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.setting.model
    }

    /// The configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.setting.base_url
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.setting.base_url.trim_end_matches('/')
        )
    }

    fn parse_error(status: u16, body: &str) -> Error {
        if let Ok(parsed) = serde_json::from_str::<WireErrorResponse>(body) {
            return Error::upstream_status(status, parsed.error.message);
        }
        Error::upstream_status(status, body.to_owned())
    }

    fn parse_response(response: WireResponse) -> Result<ChatResponse> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            Error::upstream("chat completion returned no choices")
        })?;

        let tool_calls = choice.message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
                .collect::<Vec<_>>()
        });

        let message = Message {
            role: Role::Assistant,
            role_name: None,
            content: choice.message.content.map(Content::Text),
            tool_calls,
            created_at: chrono::Utc::now(),
        };

        Ok(ChatResponse {
            message,
            usage: response.usage,
            model: response.model,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = self.chat_url();

        let mut body = serde_json::to_value(request)
            .map_err(|e| Error::upstream(format!("failed to encode request: {e}")))?;
        if request.model.is_empty()
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert(
                "model".to_owned(),
                serde_json::Value::String(self.setting.model.clone()),
            );
        }
        if let Some(obj) = body.as_object_mut()
            && let Some(tools) = request.tools.as_ref()
        {
            // The wire wants the function-calling envelope, not the bare spec.
            obj.insert(
                "tools".to_owned(),
                serde_json::Value::Array(tools.iter().map(super::chat::ToolSpec::to_wire).collect()),
            );
        }

        tracing::debug!(target: "ospa::llm", url = %url, model = %request.model, "chat request");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.setting.api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status.as_u16(), &error_text));
        }

        let response_text = response.text().await?;
        let parsed: WireResponse = serde_json::from_str(&response_text).map_err(|e| {
            Error::upstream(format!(
                "unparsable chat completion: {e}; response: {response_text}"
            ))
        })?;

        Self::parse_response(parsed)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
