//! Feedback learning and recall over the vector store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::feedback::{Feedback, dedup_feedbacks};
use crate::store::VectorStore;

/// The recall interface the chat loop consumes.
///
/// Kept narrow so the loop can run against the vector-backed
/// implementation or a test stub.
#[async_trait]
pub trait FeedbackRecall: Send + Sync + std::fmt::Debug {
    /// The `top_k` stored feedbacks most relevant to `observation`,
    /// deduplicated by `(observation_name, action_name, state_name)`.
    async fn recall(
        &self,
        agent_name: &str,
        observation: &str,
        top_k: usize,
    ) -> Result<Vec<Feedback>>;
}

/// Feedback persistence and recall: embeds `tags()` and talks to the
/// per-agent collection of the vector store.
#[derive(Debug)]
pub struct FeedbackService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl FeedbackService {
    /// Create a service over a store and an embedder.
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Store feedbacks under the agent's collection. Returns how many
    /// were written.
    pub async fn learn(&self, agent_name: &str, feedbacks: &[Feedback]) -> Result<usize> {
        if feedbacks.is_empty() {
            return Ok(0);
        }
        self.store.ensure_collection(agent_name).await?;

        let tags: Vec<String> = feedbacks.iter().map(Feedback::tags).collect();
        let vectors = self.embedder.embed_texts(&tags, true).await?;

        for (feedback, vector) in feedbacks.iter().zip(&vectors) {
            self.store.upsert(agent_name, feedback, vector).await?;
        }
        tracing::info!(
            target: "ospa::service",
            agent = %agent_name,
            count = feedbacks.len(),
            "learned feedbacks"
        );
        Ok(feedbacks.len())
    }

    /// Page through the agent's stored feedbacks.
    pub async fn list(
        &self,
        agent_name: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Feedback>> {
        self.store.list(agent_name, offset, limit).await
    }

    /// Drop everything stored for the agent.
    pub async fn delete_all(&self, agent_name: &str) -> Result<()> {
        self.store.delete_collection(agent_name).await
    }
}

#[async_trait]
impl FeedbackRecall for FeedbackService {
    async fn recall(
        &self,
        agent_name: &str,
        observation: &str,
        top_k: usize,
    ) -> Result<Vec<Feedback>> {
        if top_k == 0 || observation.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_text(observation).await?;
        let hits = self
            .store
            .query_by_vector(agent_name, &vector, top_k)
            .await?;
        Ok(dedup_feedbacks(hits))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// Embedder that hashes the first byte so similar tests are cheap.
    #[derive(Debug)]
    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            let lead = f32::from(*text.as_bytes().first().unwrap_or(&0));
            Ok(vec![lead, 1.0])
        }

        async fn embed_texts(&self, texts: &[String], _concurrent: bool) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed_text(text).await?);
            }
            Ok(out)
        }
    }

    fn feedback(observation: &str, action: &str) -> Feedback {
        Feedback {
            agent_name: String::new(),
            observation_name: "user_message".to_owned(),
            observation_content: observation.to_owned(),
            action_name: action.to_owned(),
            action_content: "{}".to_owned(),
            state_name: "conversation".to_owned(),
        }
    }

    fn service() -> FeedbackService {
        FeedbackService::new(Arc::new(MemoryStore::new()), Arc::new(StubEmbedder))
    }

    #[tokio::test]
    async fn learn_then_list_round_trips() {
        let service = service();
        let stored = service
            .learn("demo", &[feedback("hi", "send_message_to_user")])
            .await
            .unwrap();
        assert_eq!(stored, 1);

        let listed = service.list("demo", 0, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].observation_content, "hi");
    }

    #[tokio::test]
    async fn recall_deduplicates_and_respects_top_k_zero() {
        let service = service();
        service
            .learn(
                "demo",
                &[
                    feedback("hello", "send_message_to_user"),
                    feedback("hello again", "send_message_to_user"),
                    feedback("time?", "get_time"),
                ],
            )
            .await
            .unwrap();

        let hits = service.recall("demo", "hello", 10).await.unwrap();
        // Both send_message feedbacks share a dedup key.
        assert_eq!(hits.len(), 2);

        assert!(service.recall("demo", "hello", 0).await.unwrap().is_empty());
        assert!(service.recall("demo", "", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_all_clears_the_collection() {
        let service = service();
        service
            .learn("demo", &[feedback("x", "get_time")])
            .await
            .unwrap();
        service.delete_all("demo").await.unwrap();
        assert!(service.list("demo", 0, 10).await.unwrap().is_empty());
    }
}
