//! Feedback: the recall exemplar stored in the vector database.

use serde::{Deserialize, Serialize};

/// One learned exemplar: the observation an agent saw, the action it took,
/// and the state it was in.
///
/// `agent_name` mirrors the collection the feedback is stored under; the
/// store fills it in on write and read, so callers may leave it empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Name of the agent (and collection) this feedback belongs to.
    #[serde(default)]
    pub agent_name: String,
    /// Name of the observation (e.g. `user_message`).
    pub observation_name: String,
    /// The observation content.
    pub observation_content: String,
    /// Name of the action taken.
    pub action_name: String,
    /// The action content (arguments or reply).
    pub action_content: String,
    /// Name of the state the agent was in.
    pub state_name: String,
}

impl Feedback {
    /// The string this feedback is indexed under.
    ///
    /// Derived from the observation and the state; deterministic and pure,
    /// so re-embedding the same feedback yields the same vector.
    #[must_use]
    pub fn tags(&self) -> String {
        format!(
            "{}: {} | state: {}",
            self.observation_name, self.observation_content, self.state_name
        )
    }

    /// The identity used to deduplicate recalled feedback.
    #[must_use]
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.observation_name.clone(),
            self.action_name.clone(),
            self.state_name.clone(),
        )
    }

    /// Render this feedback as an exemplar block for an agent prompt.
    #[must_use]
    pub fn to_exemplar(&self) -> String {
        format!(
            "observation ({}): {}\naction ({}): {}\nstate: {}",
            self.observation_name,
            self.observation_content,
            self.action_name,
            self.action_content,
            self.state_name
        )
    }
}

/// Drop feedbacks whose `(observation_name, action_name, state_name)` was
/// already seen, preserving order.
#[must_use]
pub fn dedup_feedbacks(feedbacks: Vec<Feedback>) -> Vec<Feedback> {
    let mut seen = std::collections::HashSet::new();
    feedbacks
        .into_iter()
        .filter(|f| seen.insert(f.dedup_key()))
        .collect()
}
