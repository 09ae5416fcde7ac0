//! Q&A corpus types: raw transcripts in, training-ready OSPA rows out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One question/answer pair from a transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QAItem {
    /// The question.
    pub question: String,
    /// The answer.
    pub answer: String,
    /// Caller-supplied metadata carried through the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl QAItem {
    /// Create a new item.
    #[must_use]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            metadata: None,
        }
    }
}

/// The Q&A items of one multi-turn transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QAList {
    /// Identifier of the transcript the items came from.
    pub session_id: String,
    /// The items in transcript order.
    #[serde(default)]
    pub items: Vec<QAItem>,
}

impl QAList {
    /// Create an empty list for a session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: Vec::new(),
        }
    }

    /// Append an item.
    pub fn add_qa(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.items.push(QAItem::new(question, answer));
    }
}

/// A standalone-interpretable reformulation of one Q&A: the background
/// string makes the (background, question, answer) triple understandable
/// without the rest of the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BQAItem {
    /// Prior-turn background; empty when the question stands alone.
    pub background: String,
    /// The question.
    pub question: String,
    /// The answer.
    pub answer: String,
    /// Metadata carried over from the source item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Unique, stable item id.
    pub cqa_id: String,
}

impl BQAItem {
    /// Derive the stable id for the item at `index` of `session_id`.
    ///
    /// UUIDv5 over the session, position, and question, so a re-run over
    /// the same corpus assigns the same ids.
    #[must_use]
    pub fn derive_id(session_id: &str, index: usize, question: &str) -> String {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{session_id}:{index}:{question}").as_bytes(),
        )
        .to_string()
    }
}

/// The BQA items extracted from one transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BQAList {
    /// Identifier of the source transcript.
    pub session_id: String,
    /// The items in transcript order.
    #[serde(default)]
    pub items: Vec<BQAItem>,
}

impl BQAList {
    /// Create an empty list for a session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: Vec::new(),
        }
    }

    /// Append a BQA derived from the source item at `index`.
    pub fn add_bqa(&mut self, background: impl Into<String>, source: &QAItem, index: usize) {
        let cqa_id = BQAItem::derive_id(&self.session_id, index, &source.question);
        self.items.push(BQAItem {
            background: background.into(),
            question: source.question.clone(),
            answer: source.answer.clone(),
            metadata: source.metadata.clone(),
            cqa_id,
        });
    }
}

/// A training-ready Observation-State-Prompt-Answer row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ospa {
    /// The observation (a question).
    pub observation: String,
    /// The chapter path or label the question belongs to.
    pub state: String,
    /// The chapter's guidance prompt.
    pub prompt: String,
    /// The original (or regenerated) answer.
    pub answer: String,
}
