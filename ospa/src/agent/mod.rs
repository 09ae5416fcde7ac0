//! Agents: the per-name singleton base and the specialized step agents.
//!
//! Each control decision of the runtime is made by one small agent with
//! its own prompts: state selection, dynamic state creation, action
//! selection, reward judging, and the backward pipeline's extraction,
//! aggregation, and prompt-synthesis stages.

mod base;
mod bqa;
mod chapters;
mod new_state;
mod reward;
mod select_actions;
mod state_select;

pub use base::{Agent, template_variables};
pub use bqa::BqaAgent;
pub use chapters::{AggChaptersAgent, AttachChaptersAgent, ChapterPromptAgent, RawChapter};
pub use new_state::NewStateAgent;
pub use reward::{JudgeLabel, PairwiseJudge, RewardAgent};
pub use select_actions::SelectActionsAgent;
pub use state_select::StateSelectAgent;

use crate::feedback::Feedback;

/// Render recalled feedbacks as the exemplar block agents inject into
/// their prompts. Empty input renders an explicit placeholder so the
/// template stays stable.
#[must_use]
pub fn render_feedbacks(feedbacks: &[Feedback]) -> String {
    if feedbacks.is_empty() {
        return "(none)".to_owned();
    }
    feedbacks
        .iter()
        .enumerate()
        .map(|(i, f)| format!("Example {}:\n{}", i + 1, f.to_exemplar()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
