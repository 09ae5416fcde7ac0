//! Vector-store interface for feedback recall.
//!
//! The store holds one collection per agent; that collection is the unit
//! of isolation. [`WeaviateStore`] talks to the external database;
//! [`MemoryStore`] is the in-process implementation used by tests.

mod memory;
mod weaviate;

pub use memory::MemoryStore;
pub use weaviate::WeaviateStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::feedback::Feedback;

/// The operations the runtime needs from the external vector database.
#[async_trait]
pub trait VectorStore: Send + Sync + std::fmt::Debug {
    /// Create the agent's collection if it does not exist yet.
    async fn ensure_collection(&self, agent_name: &str) -> Result<()>;

    /// Store one feedback under the agent's collection, indexed by the
    /// given vector (the embedding of `feedback.tags()`).
    async fn upsert(&self, agent_name: &str, feedback: &Feedback, vector: &[f32]) -> Result<()>;

    /// Semantic recall: the `top_k` stored feedbacks nearest to `vector`.
    async fn query_by_vector(
        &self,
        agent_name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Feedback>>;

    /// Page through the agent's stored feedbacks.
    async fn list(&self, agent_name: &str, offset: usize, limit: usize) -> Result<Vec<Feedback>>;

    /// Drop the agent's collection and everything in it.
    async fn delete_collection(&self, agent_name: &str) -> Result<()>;
}

/// Derive the collection (class) name for an agent.
///
/// The database requires an upper-cased identifier; everything outside
/// `[A-Za-z0-9_]` is replaced with an underscore.
#[must_use]
pub fn collection_name(agent_name: &str) -> String {
    let sanitized: String = agent_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let mut chars = sanitized.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            first.to_ascii_uppercase().to_string() + chars.as_str()
        }
        Some(_) => format!("Agent_{sanitized}"),
        None => "Agent".to_owned(),
    }
}
