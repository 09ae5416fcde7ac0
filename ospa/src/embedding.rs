//! Async batch text-to-vector client.
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint. Inputs are
//! sanitized before sending, split into batches, and optionally embedded
//! concurrently with results re-assembled in input order.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::setting::EmbeddingSetting;

/// Async text-to-vector interface.
///
/// [`EmbeddingClient`] is the wire implementation; tests substitute
/// stubs.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a list of texts; `concurrent` allows parallel batch
    /// dispatch. Vectors are returned in input order.
    async fn embed_texts(&self, texts: &[String], concurrent: bool) -> Result<Vec<Vec<f32>>>;
}

/// Embedding client over an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    setting: EmbeddingSetting,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingClient {
    /// Create a client for the given configuration.
    pub fn new(setting: EmbeddingSetting) -> Result<Self> {
        if setting.api_key.is_empty() {
            return Err(Error::config("embedding API key is required"));
        }
        if setting.batch_size == 0 {
            return Err(Error::config("embedding batch size must be positive"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { setting, client })
    }

    /// Create a client from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(EmbeddingSetting::from_env()?)
    }

    /// The configured embedding model.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.setting.model
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/embeddings",
            self.setting.base_url.trim_end_matches('/')
        );
        let body = WireRequest {
            model: &self.setting.model,
            input: batch,
            dimensions: self.setting.dimensions,
        };

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.setting.api_key),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::upstream_status(
                status.as_u16(),
                format!("embedding request failed: {text}"),
            ));
        }

        let parsed: WireResponse = response.json().await.map_err(|e| {
            Error::upstream(format!("unparsable embedding response: {e}"))
        })?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(&[text.to_owned()], false).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::upstream("embedding endpoint returned no vector"))
    }

    /// Embed a list of texts, batched; `concurrent` dispatches the batches
    /// in parallel. Vectors come back in input order either way.
    async fn embed_texts(&self, texts: &[String], concurrent: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let cleaned: Vec<String> = texts
            .iter()
            .map(|t| sanitize_input(t).replace(['\n', '\r'], " "))
            .collect();
        let batches: Vec<&[String]> = cleaned.chunks(self.setting.batch_size).collect();
        tracing::debug!(
            target: "ospa::embedding",
            texts = texts.len(),
            batches = batches.len(),
            concurrent,
            "embedding texts"
        );

        let mut results: Vec<Vec<Vec<f32>>> = Vec::with_capacity(batches.len());
        if concurrent {
            results = try_join_all(batches.iter().map(|batch| self.embed_batch(batch))).await?;
        } else {
            for batch in batches {
                results.push(self.embed_batch(batch).await?);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

/// Strip zero-width characters and control characters (except `\n\r\t`)
/// that degrade embedding quality.
#[must_use]
pub fn sanitize_input(text: &str) -> String {
    const ZERO_WIDTH: [char; 5] = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}', '\u{2060}'];
    text.chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}
