//! Chapter-stage agents of the backward pipeline: corpus-wide
//! aggregation, attachment into an existing structure, and per-chapter
//! prompt synthesis.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::llm::LlmEngine;
use crate::llm::json::normalize_to_list;
use crate::usage::TokenCounter;

use super::base::Agent;

const AGG_AGENT_NAME: &str = "agg_chapters_agent";
const ATTACH_AGENT_NAME: &str = "attach_chapters_agent";
const PROMPT_AGENT_NAME: &str = "gen_chapter_prompt_agent";

const AGG_SYSTEM_PROMPT: &str = "\
You are an excellent technical editor who organizes Q&A material into \
topical chapters for a knowledge handbook.
Requirements:
1) First look at the topical similarity of all questions and answers and \
cluster them semantically.
2) Produce clear, deduplicated, non-overlapping chapter names.
3) Give each chapter a short reason for the grouping.
4) Output strict JSON with the shape: \
{\"chapters\": [{\"chapter_name\", \"reason\", \"qas\": [\"<index>\"]}]} \
where each index is the label of one input item.";

const AGG_USER_TEMPLATE: &str = "\
Group the following Q&A material into chapters:

Input Q&A items (each line starts with its index label):
{% for qa in qas %}
{{ qa }}
{% endfor %}

Additional constraints:
{% if extra_instructions -%}
{{ extra_instructions }}
{%- endif %}

Strict output JSON format:
{
  \"chapters\": [
    {
      \"chapter_name\": \"...\",
      \"reason\": \"...\",
      \"qas\": [\"1-1\", \"1-2\"]
    }
  ]
}

Every input index must appear in exactly one chapter; do not drop any.";

const ATTACH_SYSTEM_PROMPT: &str = "\
You are a technical editor extending an existing chapter catalog.
For every new chapter, choose the existing chapter it fits under best. \
Choose \"root\" when no existing chapter is a good parent.
Output strict JSON: [{\"chapter_name\": \"...\", \"parent_id\": \"...\"}].";

const ATTACH_USER_TEMPLATE: &str = "\
Existing chapters (id | path):
{% for parent in parents %}
{{ parent }}
{% endfor %}

New chapters:
{% for name in chapter_names %}
- {{ name }}
{% endfor %}

For each new chapter return its best parent id, or \"root\" when none \
fits, as JSON: [{\"chapter_name\": \"...\", \"parent_id\": \"...\"}].";

const PROMPT_SYSTEM_PROMPT: &str = "\
You are a prompt engineering expert and technical editor. Goal: for the \
given chapter, produce a reusable guidance prompt. The prompt will be \
provided to an LLM together with {chapter_name, question} to generate \
more accurate answers.

Requirements:
 - Strictly limit the knowledge scope: rely only on the chapter's topic \
and the provided Q&A material; never invent outside facts.
 - When a question is outside the chapter's scope or lacks supporting \
material, instruct the answerer to state 'insufficient evidence' and \
suggest directions for follow-up questions.
 - Professional, restrained tone, aimed at technical documentation.
 - Answer in the dominant language of the examples.
 - Prefer the terms and names used in the examples, for consistency.
 - Answering strategy: for conceptual questions give a definition and its \
boundaries first; for process or configuration questions give steps or a \
checklist.
 - No small talk, personal opinions, or links unrelated to the question.";

const PROMPT_USER_TEMPLATE: &str = "\
Chapter name: {{ chapter_name }}

{% if reason %}
Grouping reason: {{ reason }}
{% endif %}

Additional constraints:
{% if extra_instructions -%}
{{ extra_instructions }}
{%- endif %}

Chapter examples:
{% for qa in qas %}
{{ loop.index }}. {{ qa }}
{% endfor %}

Generate one reusable chapter-level guidance prompt that directs an LLM \
to answer questions on this topic from this chapter only.";

/// One chapter as the aggregation model returned it: a name, a grouping
/// reason, and the index labels of its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawChapter {
    /// Chapter name.
    pub chapter_name: String,
    /// Grouping justification.
    pub reason: String,
    /// `<list>-<item>` index labels of the member items.
    pub qas: Vec<String>,
}

fn text_field<'a>(entry: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| entry.get(*k).and_then(Value::as_str))
}

/// Agent that groups the whole BQA corpus into chapters in one call.
#[derive(Debug, Clone)]
pub struct AggChaptersAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl AggChaptersAgent {
    /// Create (or fetch) the agent and point it at `engine`. The handle
    /// is captured here for the lifetime of this value.
    pub fn new(engine: Arc<LlmEngine>) -> Result<Self> {
        let agent = Agent::get_or_create(
            AGG_AGENT_NAME,
            Arc::clone(&engine),
            AGG_SYSTEM_PROMPT,
            AGG_USER_TEMPLATE,
        )?;
        agent.set_engine(Arc::clone(&engine));
        Ok(Self { agent, engine })
    }

    /// Aggregate pre-rendered, index-labeled Q&A lines into chapters.
    pub async fn step(
        &self,
        labeled_qas: &[String],
        extra_instructions: &str,
        counter: Option<&TokenCounter>,
    ) -> Result<Vec<RawChapter>> {
        let mut vars = Map::new();
        vars.insert(
            "qas".to_owned(),
            Value::Array(
                labeled_qas
                    .iter()
                    .map(|q| Value::String(q.clone()))
                    .collect(),
            ),
        );
        vars.insert(
            "extra_instructions".to_owned(),
            Value::String(extra_instructions.to_owned()),
        );
        let context = self.agent.prepare_context(None, &vars)?;

        let raw = self.engine.structured_json(&context, counter).await?;
        let entries = normalize_to_list(raw);

        let chapters = entries
            .iter()
            .filter_map(|entry| {
                let chapter_name =
                    text_field(entry, &["chapter_name", "name", "title"])?.to_owned();
                let reason = text_field(entry, &["reason"]).unwrap_or_default().to_owned();
                let qas = entry
                    .get("qas")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| match item {
                                Value::String(s) => Some(s.trim().to_owned()),
                                Value::Object(map) => map
                                    .get("index")
                                    .and_then(Value::as_str)
                                    .map(|s| s.trim().to_owned()),
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some(RawChapter {
                    chapter_name,
                    reason,
                    qas,
                })
            })
            .collect();
        Ok(chapters)
    }
}

/// Agent that matches new chapters to parents in an existing structure.
#[derive(Debug, Clone)]
pub struct AttachChaptersAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl AttachChaptersAgent {
    /// Create (or fetch) the agent and point it at `engine`. The handle
    /// is captured here for the lifetime of this value.
    pub fn new(engine: Arc<LlmEngine>) -> Result<Self> {
        let agent = Agent::get_or_create(
            ATTACH_AGENT_NAME,
            Arc::clone(&engine),
            ATTACH_SYSTEM_PROMPT,
            ATTACH_USER_TEMPLATE,
        )?;
        agent.set_engine(Arc::clone(&engine));
        Ok(Self { agent, engine })
    }

    /// Map each chapter name to the id of its best-matching parent.
    ///
    /// `parents` are `(id, path label)` candidates. Chapters the model
    /// maps to `"root"`, to an unknown id, or not at all are absent from
    /// the result (the caller roots them).
    pub async fn step(
        &self,
        parents: &[(String, String)],
        chapter_names: &[String],
        counter: Option<&TokenCounter>,
    ) -> Result<HashMap<String, String>> {
        let mut vars = Map::new();
        vars.insert(
            "parents".to_owned(),
            Value::Array(
                parents
                    .iter()
                    .map(|(id, label)| Value::String(format!("{id} | {label}")))
                    .collect(),
            ),
        );
        vars.insert(
            "chapter_names".to_owned(),
            Value::Array(
                chapter_names
                    .iter()
                    .map(|n| Value::String(n.clone()))
                    .collect(),
            ),
        );
        let context = self.agent.prepare_context(None, &vars)?;

        let raw = self.engine.structured_json(&context, counter).await?;
        let entries = normalize_to_list(raw);

        let known: HashMap<&str, ()> = parents.iter().map(|(id, _)| (id.as_str(), ())).collect();
        let mut mapping = HashMap::new();
        for entry in &entries {
            let Some(name) = text_field(entry, &["chapter_name", "name"]) else {
                continue;
            };
            let Some(parent_id) = text_field(entry, &["parent_id", "parent"]) else {
                continue;
            };
            if known.contains_key(parent_id) {
                mapping.insert(name.to_owned(), parent_id.to_owned());
            }
        }
        Ok(mapping)
    }
}

/// Agent that synthesizes one guidance prompt per chapter.
#[derive(Debug, Clone)]
pub struct ChapterPromptAgent {
    agent: Arc<Agent>,
    engine: Arc<LlmEngine>,
}

impl ChapterPromptAgent {
    /// Create (or fetch) the agent and point it at `engine`. The handle
    /// is captured here for the lifetime of this value.
    pub fn new(engine: Arc<LlmEngine>) -> Result<Self> {
        let agent = Agent::get_or_create(
            PROMPT_AGENT_NAME,
            Arc::clone(&engine),
            PROMPT_SYSTEM_PROMPT,
            PROMPT_USER_TEMPLATE,
        )?;
        agent.set_engine(Arc::clone(&engine));
        Ok(Self { agent, engine })
    }

    /// Generate the guidance prompt bound to one chapter.
    pub async fn step(
        &self,
        chapter_name: &str,
        reason: &str,
        qas: &[String],
        extra_instructions: &str,
        counter: Option<&TokenCounter>,
    ) -> Result<String> {
        let mut vars = Map::new();
        vars.insert(
            "chapter_name".to_owned(),
            Value::String(chapter_name.to_owned()),
        );
        vars.insert("reason".to_owned(), Value::String(reason.to_owned()));
        vars.insert(
            "qas".to_owned(),
            Value::Array(qas.iter().map(|q| Value::String(q.clone())).collect()),
        );
        vars.insert(
            "extra_instructions".to_owned(),
            Value::String(extra_instructions.to_owned()),
        );
        let context = self.agent.prepare_context(None, &vars)?;

        // A mildly creative temperature reads better for guidance prose.
        self.engine.ask(&context, Some(0.3), counter).await
    }
}
