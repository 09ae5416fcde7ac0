//! Runtime configuration.
//!
//! [`Setting`] is the per-request bundle carried through the chat step
//! loop. [`LlmSetting`], [`EmbeddingSetting`], and [`VectorDbSetting`] are
//! the process-level configurations loadable from the environment.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsm::StateMachine;

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value.map_or(default, |v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "y"
        )
    })
}

/// LLM provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSetting {
    /// Model identifier.
    pub model: String,
    /// API base URL.
    pub base_url: String,
    /// API key, sent as a bearer header.
    pub api_key: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: f64,
    /// Maximum completion tokens per request.
    pub max_completion_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling p.
    pub top_p: f32,
    /// Whether the caller wants incremental tokens. Accepted for
    /// compatibility; the wire call always returns the full completion.
    pub stream: bool,
}

impl LlmSetting {
    /// Default API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    /// Default per-call timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: f64 = 180.0;

    /// Create a setting with the given credentials and model.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: Self::DEFAULT_BASE_URL.to_owned(),
            api_key: api_key.into(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            max_completion_tokens: 2048,
            temperature: 0.0,
            top_p: 1.0,
            stream: false,
        }
    }

    /// Load from the environment.
    ///
    /// Reads `LLM_MODEL`, `LLM_BASE_URL`, `LLM_API_KEY` (required),
    /// `LLM_TIMEOUT`, `LLM_MAX_COMPLETION_TOKENS`, `LLM_TEMPERATURE`,
    /// `LLM_TOP_P`, and `LLM_STREAM`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| Error::config("LLM_API_KEY environment variable not set"))?;
        let model = std::env::var("LLM_MODEL").unwrap_or_default();
        let base_url =
            std::env::var("LLM_BASE_URL").unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_owned());
        let timeout_secs = std::env::var("LLM_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        let max_completion_tokens = std::env::var("LLM_MAX_COMPLETION_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2048);
        let temperature = std::env::var("LLM_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let top_p = std::env::var("LLM_TOP_P")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.0);
        let stream = parse_bool(std::env::var("LLM_STREAM").ok(), false);

        Ok(Self {
            model,
            base_url,
            api_key,
            timeout_secs,
            max_completion_tokens,
            temperature,
            top_p,
            stream,
        })
    }

    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Check that the setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(Error::config("LLM API key is required"));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid LLM base URL '{}': {e}", self.base_url)))?;
        Ok(())
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSetting {
    /// API key for the embedding endpoint.
    pub api_key: String,
    /// Embedding model identifier.
    pub model: String,
    /// API base URL.
    pub base_url: String,
    /// Requested vector dimensionality, when the model supports it.
    pub dimensions: Option<u32>,
    /// Number of texts per request batch.
    pub batch_size: usize,
}

impl EmbeddingSetting {
    /// Default embedding model.
    pub const DEFAULT_MODEL: &'static str = "text-embedding-3-small";
    /// Default batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 10;

    /// Create a setting with the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_owned(),
            base_url: LlmSetting::DEFAULT_BASE_URL.to_owned(),
            dimensions: None,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    /// Load from the environment.
    ///
    /// Reads `EMBEDDING_API_KEY` (required), `EMBEDDING_MODEL`,
    /// `EMBEDDING_DIMENSIONS`, and `EMBEDDING_BATCH_SIZE`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("EMBEDDING_API_KEY")
            .map_err(|_| Error::config("EMBEDDING_API_KEY environment variable not set"))?;
        let mut setting = Self::new(api_key);
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            setting.model = model;
        }
        setting.dimensions = std::env::var("EMBEDDING_DIMENSIONS")
            .ok()
            .and_then(|v| v.parse().ok());
        if let Some(batch) = std::env::var("EMBEDDING_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            setting.batch_size = batch;
        }
        Ok(setting)
    }

    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Vector database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDbSetting {
    /// Base URL of the vector database.
    pub url: String,
    /// Optional API key.
    pub api_key: Option<String>,
}

impl VectorDbSetting {
    /// Default vector database URL.
    pub const DEFAULT_URL: &'static str = "http://localhost:8080";

    /// Create a setting for the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
        }
    }

    /// Load from the environment (`WEAVIATE_URL`, `WEAVIATE_API_KEY`).
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("WEAVIATE_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()),
            api_key: std::env::var("WEAVIATE_API_KEY").ok(),
        }
    }
}

fn default_top_p() -> f32 {
    1.0
}

fn default_top_k() -> usize {
    5
}

fn default_max_history_len() -> usize {
    10
}

/// Per-request configuration bundle for the chat step loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    /// API key for the chat model.
    pub api_key: String,
    /// Chat model identifier.
    pub chat_model: String,
    /// API base URL for the chat model.
    #[serde(default)]
    pub base_url: String,
    /// Nucleus sampling p.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,
    /// Number of feedback exemplars to recall per step.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Vector database URL for feedback recall.
    #[serde(default)]
    pub vector_db_url: String,
    /// Standing instruction prepended to every action-selection turn.
    #[serde(default)]
    pub global_prompt: String,
    /// Number of recent steps rendered into agent prompts.
    #[serde(default = "default_max_history_len")]
    pub max_history_len: usize,
    /// The conversation's state machine; empty for dynamic states.
    #[serde(default)]
    pub state_machine: StateMachine,
    /// Agent name; also the feedback collection this conversation uses.
    pub agent_name: String,
}

impl Default for Setting {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

impl Setting {
    /// Create a minimal setting.
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            base_url: LlmSetting::DEFAULT_BASE_URL.to_owned(),
            top_p: default_top_p(),
            temperature: 0.0,
            top_k: default_top_k(),
            vector_db_url: String::new(),
            global_prompt: String::new(),
            max_history_len: default_max_history_len(),
            state_machine: StateMachine::default(),
            agent_name: agent_name.into(),
        }
    }

    /// Check the setting is usable for a turn.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(Error::config("api_key is required"));
        }
        if self.chat_model.is_empty() {
            return Err(Error::config("chat_model is required"));
        }
        if self.agent_name.is_empty() {
            return Err(Error::config("agent_name is required"));
        }
        if !self.base_url.is_empty() {
            reqwest::Url::parse(&self.base_url).map_err(|e| {
                Error::config(format!("invalid base URL '{}': {e}", self.base_url))
            })?;
        }
        self.state_machine.validate()
    }

    /// Derive the LLM provider setting for this request.
    #[must_use]
    pub fn llm_setting(&self) -> LlmSetting {
        let mut llm = LlmSetting::new(self.api_key.clone(), self.chat_model.clone());
        if !self.base_url.is_empty() {
            llm.base_url = self.base_url.clone();
        }
        llm.temperature = self.temperature;
        llm.top_p = self.top_p;
        llm
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fsm::State;

    #[test]
    fn parse_bool_accepts_usual_spellings() {
        for v in ["1", "true", "YES", "on", "y"] {
            assert!(parse_bool(Some(v.to_owned()), false), "{v}");
        }
        assert!(!parse_bool(Some("0".to_owned()), true));
        assert!(parse_bool(None, true));
        assert!(!parse_bool(None, false));
    }

    #[test]
    fn llm_setting_defaults() {
        let setting = LlmSetting::new("key", "gpt-4o-mini");
        assert_eq!(setting.base_url, LlmSetting::DEFAULT_BASE_URL);
        assert!((setting.timeout_secs - 180.0).abs() < f64::EPSILON);
        assert!(setting.validate().is_ok());
    }

    #[test]
    fn llm_setting_rejects_empty_key_and_bad_url() {
        let setting = LlmSetting::new("", "m");
        assert!(setting.validate().is_err());

        let setting = LlmSetting::new("key", "m").base_url("not a url");
        assert!(setting.validate().is_err());
    }

    #[test]
    fn setting_validate_checks_machine() {
        let mut setting = Setting::new("key", "gpt-4o-mini", "demo");
        assert!(setting.validate().is_ok());

        setting
            .state_machine
            .states
            .insert("a".to_owned(), State::new("a", "", ""));
        setting.state_machine.initial_state_name = "missing".to_owned();
        assert!(setting.validate().is_err());
    }

    #[test]
    fn setting_llm_setting_inherits_sampling() {
        let mut setting = Setting::new("key", "gpt-4o-mini", "demo");
        setting.temperature = 0.7;
        setting.top_p = 0.9;
        let llm = setting.llm_setting();
        assert!((llm.temperature - 0.7).abs() < f32::EPSILON);
        assert!((llm.top_p - 0.9).abs() < f32::EPSILON);
        assert_eq!(llm.model, "gpt-4o-mini");
    }

    #[test]
    fn setting_serde_defaults() {
        let json = r#"{"api_key": "k", "chat_model": "m", "agent_name": "a"}"#;
        let setting: Setting = serde_json::from_str(json).unwrap();
        assert_eq!(setting.top_k, 5);
        assert_eq!(setting.max_history_len, 10);
        assert!(setting.state_machine.is_empty());
    }

    #[test]
    fn vector_db_setting_default_url() {
        let setting = VectorDbSetting::new("http://weaviate:8080");
        assert!(setting.api_key.is_none());
        assert_eq!(VectorDbSetting::DEFAULT_URL, "http://localhost:8080");
    }
}
