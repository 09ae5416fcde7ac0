//! Background extraction: turn a Q&A transcript into standalone BQA
//! items.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::llm::LlmEngine;
use crate::llm::json::{normalize_to_list, parse_loose, safe_to_int};
use crate::qa::{BQAList, QAList};
use crate::usage::TokenCounter;

use super::base::Agent;

const AGENT_NAME: &str = "bqa_agent";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a context enrichment expert. Your task is to analyze the Q&A \
sequence of a multi-turn conversation, identify dependencies between \
questions, and extract the background each question needs.

You must:
1. Decide whether each question depends on earlier turns.
2. Extract the key background information the question relies on.
3. Produce a concise but complete background so that background + \
question + answer can be understood on their own.

Extraction principles:
- Include only information directly relevant to the question.
- Stay concise; avoid redundancy.
- Ensure background + question + answer is self-contained.
- If the question has no dependency on earlier turns, the background is \
an empty string.";

const DEFAULT_USER_TEMPLATE: &str = "\
Analyze the following complete Q&A sequence and extract the background \
for every question:

Q&A sequence:
{{ qa_sequence }}

Requirements:
1. For each question decide whether it depends on earlier turns.
2. If it does, extract the key background information.
3. If it does not, leave the background empty.
4. Ensure background + question + answer is self-contained.

Return the result as a JSON array:
[
  {
    \"index\": 0,
    \"background\": \"background text or an empty string\"
  }
]";

/// Back-reference markers that signal a dependency on earlier turns, used
/// by the parse-failure fallback.
const ENGLISH_MARKERS: [&str; 6] = ["it", "this", "that", "above", "previous", "earlier"];
const CHINESE_MARKERS: [&str; 7] = ["它", "这个", "那个", "上面", "前面", "刚才", "之前"];

fn question_depends_on_context(question: &str) -> bool {
    let lower = question.to_lowercase();
    if CHINESE_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| ENGLISH_MARKERS.contains(&token))
}

/// Agent that extracts per-item backgrounds from one transcript in a
/// single LLM call.
#[derive(Debug, Clone)]
pub struct BqaAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl BqaAgent {
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

    /// Transform a Q&A list into a BQA list with one LLM call.
    ///
    /// When the call fails or its reply cannot be parsed, a heuristic
    /// fallback applies: a question containing a back-reference marker
    /// gets a terse rendering of the preceding item as its background.
    pub async fn extract(&self, qa_list: &QAList, counter: Option<&TokenCounter>) -> Result<BQAList> {
        if qa_list.items.is_empty() {
            return Ok(BQAList::new(qa_list.session_id.clone()));
        }

        let mut sequence = String::new();
        for (i, item) in qa_list.items.iter().enumerate() {
            sequence.push_str(&format!("{i}. Q: {}\n   A: {}\n", item.question, item.answer));
        }

        let mut vars = Map::new();
        vars.insert("qa_sequence".to_owned(), Value::String(sequence));
        let context = self.agent.prepare_context(None, &vars)?;

        let backgrounds = match self.engine.ask(&context, None, counter).await {
            Ok(reply) => Self::parse_backgrounds(&reply),
            Err(err) => {
                tracing::warn!(
                    target: "ospa::agent",
                    session = %qa_list.session_id,
                    error = %err,
                    "background extraction call failed, using fallback"
                );
                None
            }
        };

        match backgrounds {
            Some(backgrounds) => {
                let mut bqa_list = BQAList::new(qa_list.session_id.clone());
                for (i, item) in qa_list.items.iter().enumerate() {
                    let background = backgrounds.get(&i).cloned().unwrap_or_default();
                    bqa_list.add_bqa(background, item, i);
                }
                Ok(bqa_list)
            }
            None => Ok(Self::fallback_transform(qa_list)),
        }
    }

    /// Parse `[{index, background}]` out of the model reply. `None` means
    /// the reply was unusable and the fallback should apply.
    fn parse_backgrounds(reply: &str) -> Option<HashMap<usize, String>> {
        let entries = normalize_to_list(parse_loose(reply)?);
        if entries.is_empty() {
            return None;
        }
        let mut backgrounds = HashMap::new();
        for entry in entries {
            let index = match entry.get("index") {
                Some(Value::Number(n)) => usize::try_from(n.as_i64()?.max(0)).ok()?,
                Some(Value::String(s)) => usize::try_from(safe_to_int(s).max(0)).ok()?,
                _ => continue,
            };
            // Older prompt revisions called the field "context".
            let background = entry
                .get("background")
                .or_else(|| entry.get("context"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_owned();
            backgrounds.insert(index, background);
        }
        if backgrounds.is_empty() {
            None
        } else {
            Some(backgrounds)
        }
    }

    /// Marker-based degradation when the LLM reply is unusable.
    fn fallback_transform(qa_list: &QAList) -> BQAList {
        let mut bqa_list = BQAList::new(qa_list.session_id.clone());
        for (i, item) in qa_list.items.iter().enumerate() {
            let background = if i > 0 && question_depends_on_context(&item.question) {
                let prev = &qa_list.items[i - 1];
                format!("Previously: Q: {} A: {}", prev.question, prev.answer)
            } else {
                String::new()
            };
            bqa_list.add_bqa(background, item, i);
        }
        bqa_list
    }
}
