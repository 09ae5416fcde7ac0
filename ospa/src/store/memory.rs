//! In-process vector store.
//!
//! Cosine ranking over vectors held in memory. Exists for tests and for
//! running the chat loop without an external database.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::feedback::Feedback;

use super::{VectorStore, collection_name};

/// A vector store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<(Vec<f32>, Feedback)>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of feedbacks stored for an agent.
    pub async fn count(&self, agent_name: &str) -> usize {
        let class = collection_name(agent_name);
        self.collections
            .read()
            .await
            .get(&class)
            .map_or(0, Vec::len)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, agent_name: &str) -> Result<()> {
        let class = collection_name(agent_name);
        self.collections.write().await.entry(class).or_default();
        Ok(())
    }

    async fn upsert(&self, agent_name: &str, feedback: &Feedback, vector: &[f32]) -> Result<()> {
        let class = collection_name(agent_name);
        // Stamp the owning collection, matching the wire store's schema.
        let mut stored = feedback.clone();
        stored.agent_name = agent_name.to_owned();
        self.collections
            .write()
            .await
            .entry(class)
            .or_default()
            .push((vector.to_vec(), stored));
        Ok(())
    }

    async fn query_by_vector(
        &self,
        agent_name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Feedback>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let class = collection_name(agent_name);
        let collections = self.collections.read().await;
        let Some(entries) = collections.get(&class) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &Feedback)> = entries
            .iter()
            .map(|(v, f)| (cosine(vector, v), f))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, f)| f.clone())
            .collect())
    }

    async fn list(&self, agent_name: &str, offset: usize, limit: usize) -> Result<Vec<Feedback>> {
        let class = collection_name(agent_name);
        let collections = self.collections.read().await;
        Ok(collections
            .get(&class)
            .map(|entries| {
                entries
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .map(|(_, f)| f.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_collection(&self, agent_name: &str) -> Result<()> {
        let class = collection_name(agent_name);
        self.collections.write().await.remove(&class);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn feedback(content: &str) -> Feedback {
        Feedback {
            agent_name: String::new(),
            observation_name: "user_message".to_owned(),
            observation_content: content.to_owned(),
            action_name: "send_message_to_user".to_owned(),
            action_content: "{}".to_owned(),
            state_name: "conversation".to_owned(),
        }
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity() {
        let store = MemoryStore::new();
        store.ensure_collection("demo").await.unwrap();
        store
            .upsert("demo", &feedback("near"), &[1.0, 0.0])
            .await
            .unwrap();
        store
            .upsert("demo", &feedback("far"), &[0.0, 1.0])
            .await
            .unwrap();

        let hits = store
            .query_by_vector("demo", &[0.9, 0.1], 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation_content, "near");
    }

    #[tokio::test]
    async fn top_k_zero_returns_nothing() {
        let store = MemoryStore::new();
        store
            .upsert("demo", &feedback("x"), &[1.0])
            .await
            .unwrap();
        assert!(
            store
                .query_by_vector("demo", &[1.0], 0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn list_pages_in_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .upsert("demo", &feedback(&format!("f{i}")), &[1.0])
                .await
                .unwrap();
        }
        let page = store.list("demo", 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].observation_content, "f1");
    }

    #[tokio::test]
    async fn delete_collection_empties_agent() {
        let store = MemoryStore::new();
        store
            .upsert("demo", &feedback("x"), &[1.0])
            .await
            .unwrap();
        store.delete_collection("demo").await.unwrap();
        assert_eq!(store.count("demo").await, 0);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
