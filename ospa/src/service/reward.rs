//! Reward service: judge candidate answers against a target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::{PairwiseJudge, RewardAgent};
use crate::error::Result;
use crate::llm::LlmEngine;
use crate::usage::TokenCounter;

/// The result of comparing candidates against a target answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardResult {
    /// The question the answers respond to.
    pub question: String,
    /// The reference answer.
    pub target_answer: String,
    /// One judgment per candidate, ordered by candidate index.
    pub results: Vec<PairwiseJudge>,
}

/// Pairwise semantic-equivalence judgment service.
#[derive(Debug)]
pub struct RewardService {
    agent: RewardAgent,
}

impl RewardService {
    /// Create a service over the given engine.
    pub fn new(engine: Arc<LlmEngine>) -> Result<Self> {
        Ok(Self {
            agent: RewardAgent::new(engine)?,
        })
    }

    /// Judge each candidate against the target answer.
    ///
    /// Zero candidates short-circuit to an empty result without any LLM
    /// call.
    pub async fn compare_answer(
        &self,
        question: &str,
        candidates: &[String],
        target_answer: &str,
        counter: Option<&TokenCounter>,
    ) -> Result<RewardResult> {
        let results = self
            .agent
            .step(question, candidates, target_answer, counter)
            .await?;
        Ok(RewardResult {
            question: question.to_owned(),
            target_answer: target_answer.to_owned(),
            results,
        })
    }
}
