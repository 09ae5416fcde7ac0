//! The backward pipeline: Q&A transcripts in, chapterized OSPA rows out.
//!
//! Four subpipelines: per-list BQA extraction, one corpus-wide chapter
//! aggregation call, per-chapter prompt synthesis, and OSPA emission.
//! Extraction and synthesis fan out under a configurable concurrency cap;
//! aggregation is inherently a single call over the whole corpus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agent::{
    AggChaptersAgent, AttachChaptersAgent, BqaAgent, ChapterPromptAgent,
};
use crate::chapter::{ChapterNode, ChapterStructure};
use crate::error::{Error, Result};
use crate::llm::LlmEngine;
use crate::qa::{BQAItem, BQAList, Ospa, QAList};
use crate::usage::TokenCounter;

/// Chapter that catches items the aggregation failed to classify.
const UNCLASSIFIED_CHAPTER: &str = "Unclassified";

fn default_max_level() -> usize {
    3
}

fn default_concurrency() -> usize {
    3
}

/// A backward pipeline run's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackwardRequest {
    /// The Q&A transcripts to process.
    pub qa_lists: Vec<QAList>,
    /// Pre-existing chapter structure to extend, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_structure: Option<ChapterStructure>,
    /// Maximum chapter depth.
    #[serde(default = "default_max_level")]
    pub max_level: usize,
    /// Extra instructions forwarded to the aggregation and synthesis
    /// prompts.
    #[serde(default)]
    pub extra_instructions: String,
    /// Fan-out cap for the parallel stages.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl BackwardRequest {
    /// Create a request over the given transcripts with default knobs.
    #[must_use]
    pub fn new(qa_lists: Vec<QAList>) -> Self {
        Self {
            qa_lists,
            chapter_structure: None,
            max_level: default_max_level(),
            extra_instructions: String::new(),
            concurrency: default_concurrency(),
        }
    }
}

/// A backward pipeline run's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackwardResponse {
    /// The final chapter structure.
    pub chapter_structure: ChapterStructure,
    /// One OSPA row per input item.
    pub ospa_list: Vec<Ospa>,
    /// Human-readable record of what the run did.
    pub operation_log: Vec<String>,
}

/// One planned chapter before it is attached to the structure.
#[derive(Debug)]
struct PlannedChapter {
    node: ChapterNode,
    labels: Vec<String>,
}

/// The backward pipeline orchestrator.
#[derive(Debug)]
pub struct BackwardService {
    bqa: BqaAgent,
    agg: AggChaptersAgent,
    attach: AttachChaptersAgent,
    prompt: ChapterPromptAgent,
    prompt_cache: Mutex<HashMap<(String, Vec<String>), String>>,
}

impl BackwardService {
    /// Create a service over the given engine.
    pub fn new(engine: Arc<LlmEngine>) -> Result<Self> {
        Ok(Self {
            bqa: BqaAgent::new(Arc::clone(&engine))?,
            agg: AggChaptersAgent::new(Arc::clone(&engine))?,
            attach: AttachChaptersAgent::new(Arc::clone(&engine))?,
            prompt: ChapterPromptAgent::new(engine)?,
            prompt_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Run the pipeline.
    pub async fn run(
        &self,
        request: BackwardRequest,
        counter: Option<&TokenCounter>,
    ) -> Result<BackwardResponse> {
        let cap = request.concurrency.max(1);
        let mut log = Vec::new();

        // (a) BQA extraction, one call per transcript, fanned out.
        let bqa_lists: Vec<BQAList> = futures::stream::iter(
            request
                .qa_lists
                .iter()
                .map(|list| self.bqa.extract(list, counter)),
        )
        .buffered(cap)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        // Label every item `<list>-<item>` (both 1-based).
        let mut items: HashMap<String, &BQAItem> = HashMap::new();
        let mut label_order: Vec<String> = Vec::new();
        let mut labeled_lines: Vec<String> = Vec::new();
        for (li, list) in bqa_lists.iter().enumerate() {
            for (ii, item) in list.items.iter().enumerate() {
                let label = format!("{}-{}", li + 1, ii + 1);
                let mut line = format!("{label}. Q: {} A: {}", item.question, item.answer);
                if !item.background.is_empty() {
                    line.push_str(&format!(" (background: {})", item.background));
                }
                labeled_lines.push(line);
                label_order.push(label.clone());
                items.insert(label, item);
            }
        }
        log.push(format!(
            "extracted {} BQA items from {} transcripts",
            label_order.len(),
            bqa_lists.len()
        ));

        if label_order.is_empty() {
            return Ok(BackwardResponse {
                chapter_structure: request.chapter_structure.unwrap_or_default(),
                ospa_list: Vec::new(),
                operation_log: log,
            });
        }

        // (b) One aggregation call over the whole corpus.
        let raw_chapters = self
            .agg
            .step(&labeled_lines, &request.extra_instructions, counter)
            .await?;

        let mut assigned: HashSet<String> = HashSet::new();
        let mut planned: Vec<PlannedChapter> = Vec::new();
        for raw in raw_chapters {
            let mut labels = Vec::new();
            for label in &raw.qas {
                let label = label.trim().to_owned();
                if !items.contains_key(&label) {
                    tracing::warn!(
                        target: "ospa::service",
                        chapter = %raw.chapter_name,
                        index = %label,
                        "aggregation referenced an unknown index"
                    );
                    log.push(format!(
                        "dropped unknown index '{label}' from chapter '{}'",
                        raw.chapter_name
                    ));
                    continue;
                }
                if !assigned.insert(label.clone()) {
                    tracing::warn!(
                        target: "ospa::service",
                        chapter = %raw.chapter_name,
                        index = %label,
                        "item assigned to more than one chapter"
                    );
                    log.push(format!(
                        "index '{label}' already assigned, ignored in chapter '{}'",
                        raw.chapter_name
                    ));
                    continue;
                }
                labels.push(label);
            }
            if labels.is_empty() {
                log.push(format!("dropped empty chapter '{}'", raw.chapter_name));
                continue;
            }
            let cqa_ids = labels.iter().map(|l| items[l].cqa_id.clone()).collect();
            planned.push(PlannedChapter {
                node: ChapterNode::new(raw.chapter_name, raw.reason, cqa_ids),
                labels,
            });
        }

        // Items the model dropped land in an Unclassified chapter.
        let dropped: Vec<String> = label_order
            .iter()
            .filter(|label| !assigned.contains(*label))
            .cloned()
            .collect();
        if !dropped.is_empty() {
            tracing::warn!(
                target: "ospa::service",
                count = dropped.len(),
                "aggregation dropped items, collecting them as Unclassified"
            );
            log.push(format!(
                "{} items were not classified, collected under '{UNCLASSIFIED_CHAPTER}'",
                dropped.len()
            ));
            let cqa_ids = dropped.iter().map(|l| items[l].cqa_id.clone()).collect();
            planned.push(PlannedChapter {
                node: ChapterNode::new(
                    UNCLASSIFIED_CHAPTER,
                    "Items the aggregation did not classify.",
                    cqa_ids,
                ),
                labels: dropped,
            });
        }
        log.push(format!("aggregated into {} chapters", planned.len()));

        // Attach the new chapters to the structure. New chapters go under
        // the best-matching existing node; depth is capped at max_level by
        // only offering parents above it, so an over-deep match flattens
        // to the deepest allowed level.
        let mut structure = request.chapter_structure.unwrap_or_default();
        let mut parent_map: HashMap<String, String> = HashMap::new();
        if !structure.is_empty() && request.max_level > 1 {
            let parents = structure.paths_up_to(request.max_level - 1);
            if !parents.is_empty() {
                let names: Vec<String> =
                    planned.iter().map(|p| p.node.title.clone()).collect();
                parent_map = self.attach.step(&parents, &names, counter).await?;
            }
        }

        let mut chapter_order: Vec<(String, Vec<String>)> = Vec::new();
        for PlannedChapter { node, labels } in planned {
            let id = node.id.clone();
            match parent_map.get(&node.title) {
                Some(parent_id) if structure.node(parent_id).is_some() => {
                    structure.attach_child(parent_id, node)?;
                }
                _ => structure.insert_root(node),
            }
            chapter_order.push((id, labels));
        }

        // (c) Per-chapter prompt synthesis, fanned out and cached.
        let jobs: Vec<(String, String, String, Vec<String>, Vec<String>)> = chapter_order
            .iter()
            .map(|(id, labels)| {
                let node = structure
                    .node(id)
                    .ok_or_else(|| Error::config(format!("lost chapter node '{id}'")))?;
                let rendered: Vec<String> = labels
                    .iter()
                    .map(|label| {
                        let item = items[label];
                        if item.background.is_empty() {
                            format!("Q: {} A: {}", item.question, item.answer)
                        } else {
                            format!(
                                "Background: {} Q: {} A: {}",
                                item.background, item.question, item.answer
                            )
                        }
                    })
                    .collect();
                Ok((
                    id.clone(),
                    node.title.clone(),
                    node.reason.clone(),
                    rendered,
                    node.related_cqa_ids.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let extra = request.extra_instructions.clone();
        let prompts: Vec<(String, String)> = futures::stream::iter(jobs.into_iter().map(
            |(id, title, reason, rendered, cqa_ids)| {
                let extra = extra.clone();
                async move {
                    let prompt = self
                        .chapter_prompt(&title, &reason, &rendered, &cqa_ids, &extra, counter)
                        .await?;
                    Ok::<_, Error>((id, prompt))
                }
            },
        ))
        .buffered(cap)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        for (id, prompt) in prompts {
            if let Some(node) = structure.node_mut(&id) {
                node.content = Some(prompt);
            }
        }
        log.push(format!("synthesized {} chapter prompts", chapter_order.len()));

        // (d) OSPA emission: chapter order, then item order.
        let mut ospa_list = Vec::new();
        for (id, labels) in &chapter_order {
            let Some(node) = structure.node(id) else {
                continue;
            };
            let state = structure
                .path_label(id)
                .unwrap_or_else(|| node.title.clone());
            let prompt = node.content.clone().unwrap_or_default();
            for label in labels {
                let item = items[label];
                ospa_list.push(Ospa {
                    observation: item.question.clone(),
                    state: state.clone(),
                    prompt: prompt.clone(),
                    answer: item.answer.clone(),
                });
            }
        }
        log.push(format!("emitted {} OSPA rows", ospa_list.len()));

        Ok(BackwardResponse {
            chapter_structure: structure,
            ospa_list,
            operation_log: log,
        })
    }

    /// Synthesize (or reuse) the guidance prompt for one chapter. The
    /// cache key is `(chapter_name, sorted member ids)`, making the prompt
    /// a pure function of that pair while the cache lives.
    async fn chapter_prompt(
        &self,
        title: &str,
        reason: &str,
        rendered_qas: &[String],
        cqa_ids: &[String],
        extra_instructions: &str,
        counter: Option<&TokenCounter>,
    ) -> Result<String> {
        let mut sorted_ids: Vec<String> = cqa_ids.to_vec();
        sorted_ids.sort_unstable();
        let key = (title.to_owned(), sorted_ids);

        if let Some(prompt) = self.prompt_cache.lock().await.get(&key) {
            return Ok(prompt.clone());
        }

        let prompt = self
            .prompt
            .step(title, reason, rendered_qas, extra_instructions, counter)
            .await?;
        self.prompt_cache
            .lock()
            .await
            .insert(key, prompt.clone());
        Ok(prompt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    fn service_with(mock: &Arc<MockProvider>) -> BackwardService {
        let engine = Arc::new(LlmEngine::with_provider(
            Arc::clone(mock) as _,
            "mock-model",
        ));
        BackwardService::new(engine).unwrap()
    }

    fn transcript(session: &str, pairs: &[(&str, &str)]) -> QAList {
        let mut list = QAList::new(session);
        for (q, a) in pairs {
            list.add_qa(*q, *a);
        }
        list
    }

    fn request(lists: Vec<QAList>) -> BackwardRequest {
        let mut request = BackwardRequest::new(lists);
        request.concurrency = 1;
        request
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let mock = Arc::new(MockProvider::new());
        let service = service_with(&mock);

        let response = service.run(request(Vec::new()), None).await.unwrap();
        assert!(response.ospa_list.is_empty());
        assert!(response.chapter_structure.is_empty());
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn full_run_produces_one_row_per_item() {
        let mock = Arc::new(MockProvider::new());
        // Extraction for the single transcript.
        mock.push_text(r#"[{"index": 0, "background": ""}, {"index": 1, "background": ""}]"#);
        // Aggregation.
        mock.push_text(
            r#"{"chapters": [
                {"chapter_name": "Python基础", "reason": "语言入门", "qas": ["1-1"]},
                {"chapter_name": "数据结构", "reason": "容器", "qas": ["1-2"]}
            ]}"#,
        );
        // One prompt per chapter.
        mock.push_text("只依据Python基础一章回答。");
        mock.push_text("只依据数据结构一章回答。");
        let service = service_with(&mock);

        let lists = vec![transcript(
            "s1",
            &[
                ("什么是Python?", "一种解释型语言。"),
                ("什么是列表?", "有序可变序列。"),
            ],
        )];
        let response = service.run(request(lists), None).await.unwrap();

        assert_eq!(response.ospa_list.len(), 2);
        assert_eq!(response.chapter_structure.len(), 2);
        assert_eq!(response.ospa_list[0].state, "Python基础");
        assert_eq!(response.ospa_list[0].observation, "什么是Python?");
        assert_eq!(response.ospa_list[0].prompt, "只依据Python基础一章回答。");
        assert!(
            response
                .chapter_structure
                .nodes
                .values()
                .all(|n| n.content.is_some())
        );
        assert!(response.chapter_structure.validate().is_ok());
    }

    #[tokio::test]
    async fn dropped_items_land_in_unclassified() {
        let mock = Arc::new(MockProvider::new());
        mock.push_text(r#"[{"index": 0, "background": ""}, {"index": 1, "background": ""}]"#);
        // Aggregation drops 1-2 and references a bogus index.
        mock.push_text(
            r#"{"chapters": [
                {"chapter_name": "Python基础", "reason": "", "qas": ["1-1", "9-9"]}
            ]}"#,
        );
        mock.push_text("prompt a");
        mock.push_text("prompt b");
        let service = service_with(&mock);

        let lists = vec![transcript(
            "s1",
            &[("什么是Python?", "语言。"), ("什么是索引?", "下标。")],
        )];
        let response = service.run(request(lists), None).await.unwrap();

        assert_eq!(response.ospa_list.len(), 2);
        let titles: Vec<&str> = response
            .chapter_structure
            .nodes
            .values()
            .map(|n| n.title.as_str())
            .collect();
        assert!(titles.contains(&UNCLASSIFIED_CHAPTER));
        assert!(
            response
                .operation_log
                .iter()
                .any(|l| l.contains("not classified"))
        );
        assert!(
            response
                .operation_log
                .iter()
                .any(|l| l.contains("unknown index"))
        );
    }

    #[tokio::test]
    async fn duplicate_assignment_keeps_first_chapter() {
        let mock = Arc::new(MockProvider::new());
        mock.push_text(r#"[{"index": 0, "background": ""}]"#);
        mock.push_text(
            r#"{"chapters": [
                {"chapter_name": "A", "reason": "", "qas": ["1-1"]},
                {"chapter_name": "B", "reason": "", "qas": ["1-1"]}
            ]}"#,
        );
        mock.push_text("prompt a");
        let service = service_with(&mock);

        let lists = vec![transcript("s1", &[("q", "a")])];
        let response = service.run(request(lists), None).await.unwrap();

        // Chapter B became empty and was dropped; one row total.
        assert_eq!(response.ospa_list.len(), 1);
        assert_eq!(response.chapter_structure.len(), 1);
        assert_eq!(response.ospa_list[0].state, "A");
    }

    #[tokio::test]
    async fn prompt_cache_reuses_identical_chapters() {
        let mock = Arc::new(MockProvider::new());
        // First run.
        mock.push_text(r#"[{"index": 0, "background": ""}]"#);
        mock.push_text(r#"{"chapters": [{"chapter_name": "A", "reason": "", "qas": ["1-1"]}]}"#);
        mock.push_text("the one prompt");
        // Second run: extraction and aggregation again, but no prompt call.
        mock.push_text(r#"[{"index": 0, "background": ""}]"#);
        mock.push_text(r#"{"chapters": [{"chapter_name": "A", "reason": "", "qas": ["1-1"]}]}"#);
        let service = service_with(&mock);

        let lists = vec![transcript("s1", &[("q", "a")])];
        let first = service.run(request(lists.clone()), None).await.unwrap();
        let second = service.run(request(lists), None).await.unwrap();

        assert_eq!(first.ospa_list, second.ospa_list);
        assert_eq!(first.chapter_structure, second.chapter_structure);
        // 3 calls for the first run, 2 for the second (cached prompt).
        assert_eq!(mock.request_count(), 5);
    }

    #[tokio::test]
    async fn attaches_under_existing_structure() {
        let mock = Arc::new(MockProvider::new());
        mock.push_text(r#"[{"index": 0, "background": ""}]"#);
        mock.push_text(
            r#"{"chapters": [{"chapter_name": "数据结构", "reason": "", "qas": ["1-1"]}]}"#,
        );

        let mut existing = ChapterStructure::new();
        let root = ChapterNode::new("Python", "root topic", Vec::new());
        let root_id = root.id.clone();
        existing.insert_root(root);

        // Attachment decision, then the chapter prompt.
        mock.push_text(&format!(
            r#"[{{"chapter_name": "数据结构", "parent_id": "{root_id}"}}]"#
        ));
        mock.push_text("prompt");
        let service = service_with(&mock);

        let mut req = request(vec![transcript("s1", &[("什么是列表?", "序列。")])]);
        req.chapter_structure = Some(existing);
        let response = service.run(req, None).await.unwrap();

        assert_eq!(response.chapter_structure.len(), 2);
        let child_id = response.chapter_structure.nodes[&root_id].children[0].clone();
        assert_eq!(
            response.chapter_structure.depth_of(&child_id),
            Some(2)
        );
        assert_eq!(response.ospa_list[0].state, "Python > 数据结构");
        assert!(response.chapter_structure.validate().is_ok());
    }
}
