//! Pairwise semantic-equivalence judging of candidate answers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::llm::LlmEngine;
use crate::llm::json::{normalize_to_list, safe_to_int};
use crate::usage::TokenCounter;

use super::base::Agent;

const AGENT_NAME: &str = "reward_agent";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an answer consistency judge. Judge each candidate answer only \
against the meaning of the target answer.
Label definitions:
- equivalent: same facts and conclusion as the target; wording differences \
do not change meaning or scope.
- partially_equivalent: the core matches, but scope, preconditions, time, \
or quantities differ or are missing.
- different: the conclusion differs from or contradicts the target.
- unsupported: unrelated to the question or target, vague, or adds \
inferences the target does not support.
Requirements:
- Output JSON with keys index/label/confidence/reason.
- confidence is a decimal between 0 and 1, adjusted to your certainty.
- reason is a concise note of the key difference.";

const DEFAULT_USER_TEMPLATE: &str = "\
Question:
{{ question }}

Target answer:
{{ target }}

Candidate answers:
{% for ans in candidates %}
{{ loop.index }}. {{ ans }}
{% endfor %}

Return a JSON list with one element per candidate:
[
  {
    \"index\": 0,
    \"label\": \"equivalent | partially_equivalent | different | unsupported\",
    \"confidence\": 0.0,
    \"reason\": \"...\"
  }
]";

/// Judgment label, ordered here from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum JudgeLabel {
    /// Same facts and conclusion as the target.
    Equivalent,
    /// Core matches but qualified differences exist.
    PartiallyEquivalent,
    /// Conclusion differs or contradicts.
    Different,
    /// Unrelated, vague, or adds unsupported inferences.
    Unsupported,
}

impl JudgeLabel {
    /// The wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equivalent => "equivalent",
            Self::PartiallyEquivalent => "partially_equivalent",
            Self::Different => "different",
            Self::Unsupported => "unsupported",
        }
    }
}

/// One candidate's judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PairwiseJudge {
    /// Position of the candidate in the input array.
    pub index: usize,
    /// The judgment label.
    pub label: JudgeLabel,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Concise justification.
    pub reason: String,
}

/// Resolve a label from whatever the model put in the `label` field.
///
/// When the value is ambiguous (several labels in one string, or a list),
/// the most severe mentioned label wins:
/// `unsupported > different > partially_equivalent > equivalent`. A value
/// mentioning no known label is judged `unsupported`.
fn parse_label(value: Option<&Value>) -> JudgeLabel {
    let text = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let text = text.to_ascii_lowercase();

    if text.contains("unsupported") {
        return JudgeLabel::Unsupported;
    }
    if text.contains("different") {
        return JudgeLabel::Different;
    }
    if text.contains("partially_equivalent") || text.contains("partially equivalent") {
        return JudgeLabel::PartiallyEquivalent;
    }
    if text.contains("equivalent") {
        return JudgeLabel::Equivalent;
    }
    JudgeLabel::Unsupported
}

fn parse_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    raw.clamp(0.0, 1.0)
}

/// Agent that judges candidates against a target answer.
#[derive(Debug, Clone)]
pub struct RewardAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl RewardAgent {
    /// Create (or fetch) the agent and point it at `engine`. The handle
    /// is captured here for the lifetime of this value.
    pub fn new(engine: Arc<LlmEngine>) -> Result<Self> {
        let agent = Agent::get_or_create(
            AGENT_NAME,
            Arc::clone(&engine),
            DEFAULT_SYSTEM_PROMPT,
            DEFAULT_USER_TEMPLATE,
        )?;
        agent.set_engine(Arc::clone(&engine));
        Ok(Self { agent, engine })
    }

    /// Judge every candidate against the target answer.
    ///
    /// Results follow the model's `index` field when all entries carry
    /// one; otherwise input order is kept. Zero candidates yield an empty
    /// result without an LLM call.
    pub async fn step(
        &self,
        question: &str,
        candidates: &[String],
        target_answer: &str,
        counter: Option<&TokenCounter>,
    ) -> Result<Vec<PairwiseJudge>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut vars = Map::new();
        vars.insert(
            "question".to_owned(),
            Value::String(question.to_owned()),
        );
        vars.insert(
            "target".to_owned(),
            Value::String(target_answer.to_owned()),
        );
        vars.insert(
            "candidates".to_owned(),
            Value::Array(
                candidates
                    .iter()
                    .map(|c| Value::String(c.clone()))
                    .collect(),
            ),
        );
        let context = self.agent.prepare_context(None, &vars)?;

        let raw = self.engine.structured_json(&context, counter).await?;
        let entries = normalize_to_list(raw);

        let all_indexed = !entries.is_empty()
            && entries
                .iter()
                .all(|e| e.get("index").is_some_and(|v| !v.is_null()));

        let mut judges: Vec<PairwiseJudge> = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let index = if all_indexed {
                    let raw_index = entry
                        .get("index")
                        .map(|v| match v {
                            Value::Number(n) => n.as_i64().unwrap_or(0),
                            Value::String(s) => safe_to_int(s),
                            _ => 0,
                        })
                        .unwrap_or(0);
                    usize::try_from(raw_index.max(0)).unwrap_or(0)
                } else {
                    position
                };
                PairwiseJudge {
                    index,
                    label: parse_label(entry.get("label")),
                    confidence: parse_confidence(entry.get("confidence")),
                    reason: entry
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                }
            })
            .collect();

        if all_indexed {
            judges.sort_by_key(|j| j.index);
        }
        Ok(judges)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    fn agent_with(mock: &Arc<MockProvider>) -> RewardAgent {
        let engine = Arc::new(LlmEngine::with_provider(
            Arc::clone(mock) as _,
            "mock-model",
        ));
        RewardAgent::new(engine).unwrap()
    }

    #[tokio::test]
    async fn zero_candidates_short_circuit() {
        let mock = Arc::new(MockProvider::new());
        let agent = agent_with(&mock);

        let judges = agent.step("q", &[], "t", None).await.unwrap();
        assert!(judges.is_empty());
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn parses_and_orders_by_index() {
        let mock = Arc::new(MockProvider::new());
        mock.push_text(
            r#"[
                {"index": 2, "label": "different", "confidence": 0.9, "reason": "象不是最大的"},
                {"index": 0, "label": "equivalent", "confidence": 0.95, "reason": "一致"},
                {"index": 1, "label": "equivalent", "confidence": 0.9, "reason": "语序不同"}
            ]"#,
        );
        let agent = agent_with(&mock);

        let candidates = vec![
            "蓝鲸是最大的哺乳动物。".to_owned(),
            "最大的哺乳动物是蓝鲸。".to_owned(),
            "大象是最大的哺乳动物。".to_owned(),
        ];
        let judges = agent
            .step("地球上最大的哺乳动物是什么？", &candidates, "蓝鲸是最大的哺乳动物。", None)
            .await
            .unwrap();

        assert_eq!(judges.len(), 3);
        assert_eq!(judges[0].label, JudgeLabel::Equivalent);
        assert_eq!(judges[1].label, JudgeLabel::Equivalent);
        assert_eq!(judges[2].label, JudgeLabel::Different);
        assert!(judges.iter().all(|j| j.confidence >= 0.7));
    }

    #[tokio::test]
    async fn wrapped_response_is_normalized() {
        let mock = Arc::new(MockProvider::new());
        mock.push_text(r#"{"results": [{"index": 0, "label": "equivalent", "confidence": 1.0, "reason": ""}]}"#);
        let agent = agent_with(&mock);

        let judges = agent
            .step("q", &["a".to_owned()], "t", None)
            .await
            .unwrap();
        assert_eq!(judges.len(), 1);
        assert_eq!(judges[0].label, JudgeLabel::Equivalent);
    }

    #[tokio::test]
    async fn missing_indices_fall_back_to_input_order() {
        let mock = Arc::new(MockProvider::new());
        mock.push_text(
            r#"[
                {"label": "equivalent", "confidence": 0.8, "reason": ""},
                {"label": "different", "confidence": 0.9, "reason": ""}
            ]"#,
        );
        let agent = agent_with(&mock);

        let judges = agent
            .step("q", &["a".to_owned(), "b".to_owned()], "t", None)
            .await
            .unwrap();
        assert_eq!(judges[0].index, 0);
        assert_eq!(judges[1].index, 1);
        assert_eq!(judges[1].label, JudgeLabel::Different);
    }

    #[test]
    fn ambiguous_labels_pick_most_severe() {
        assert_eq!(
            parse_label(Some(&Value::String(
                "equivalent or maybe different".to_owned()
            ))),
            JudgeLabel::Different
        );
        assert_eq!(
            parse_label(Some(&serde_json::json!(["equivalent", "unsupported"]))),
            JudgeLabel::Unsupported
        );
        assert_eq!(
            parse_label(Some(&Value::String("partially equivalent".to_owned()))),
            JudgeLabel::PartiallyEquivalent
        );
        assert_eq!(
            parse_label(Some(&Value::String("equivalent".to_owned()))),
            JudgeLabel::Equivalent
        );
        assert_eq!(parse_label(None), JudgeLabel::Unsupported);
        assert_eq!(
            parse_label(Some(&Value::String("gibberish".to_owned()))),
            JudgeLabel::Unsupported
        );
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(parse_confidence(Some(&serde_json::json!(1.5))), 1.0);
        assert_eq!(parse_confidence(Some(&serde_json::json!(-0.2))), 0.0);
        assert_eq!(parse_confidence(Some(&serde_json::json!("0.85"))), 0.85);
        assert_eq!(parse_confidence(None), 0.0);
    }
}
