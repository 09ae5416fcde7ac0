//! The chapter forest produced by the backward pipeline.
//!
//! A [`ChapterStructure`] is a forest: every node is reachable from
//! exactly one root and there are no cycles. Nodes reference the BQA items
//! they group by id.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A named group of BQA items sharing a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterNode {
    /// Node id, unique within the structure.
    pub id: String,
    /// Chapter title.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional chapter content (the synthesized guidance prompt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Ids of child chapters, in order.
    #[serde(default)]
    pub children: Vec<String>,
    /// Ids of the BQA items grouped under this chapter, in order.
    #[serde(default)]
    pub related_cqa_ids: Vec<String>,
    /// Short natural-language justification of the grouping.
    #[serde(default)]
    pub reason: String,
}

impl ChapterNode {
    /// Create a leaf chapter with a derived stable id.
    #[must_use]
    pub fn new(title: impl Into<String>, reason: impl Into<String>, cqa_ids: Vec<String>) -> Self {
        let title = title.into();
        let id = Self::derive_id(&title, &cqa_ids);
        Self {
            id,
            title,
            description: None,
            content: None,
            children: Vec::new(),
            related_cqa_ids: cqa_ids,
            reason: reason.into(),
        }
    }

    /// Derive a stable node id from the title and the sorted member ids,
    /// so identical pipeline runs produce identical structures.
    #[must_use]
    pub fn derive_id(title: &str, cqa_ids: &[String]) -> String {
        let mut sorted: Vec<&str> = cqa_ids.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{title}:{}", sorted.join(",")).as_bytes(),
        )
        .to_string()
    }
}

/// A forest of chapters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStructure {
    /// All nodes keyed by id.
    #[serde(default)]
    pub nodes: BTreeMap<String, ChapterNode>,
    /// Ids of the root chapters, in order.
    #[serde(default)]
    pub root_ids: Vec<String>,
}

impl ChapterStructure {
    /// Create an empty structure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the structure holds no chapters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of chapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&ChapterNode> {
        self.nodes.get(id)
    }

    /// Mutable lookup.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut ChapterNode> {
        self.nodes.get_mut(id)
    }

    /// Insert a node as a new root.
    pub fn insert_root(&mut self, node: ChapterNode) {
        self.root_ids.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Insert a node as the last child of `parent_id`.
    ///
    /// Fails when the parent is unknown.
    pub fn attach_child(&mut self, parent_id: &str, node: ChapterNode) -> Result<()> {
        let Some(parent) = self.nodes.get_mut(parent_id) else {
            return Err(Error::config(format!(
                "unknown chapter parent id '{parent_id}'"
            )));
        };
        parent.children.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// The parent of a node, `None` for roots and unknown ids.
    #[must_use]
    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.nodes
            .values()
            .find(|n| n.children.iter().any(|c| c == id))
            .map(|n| n.id.as_str())
    }

    /// Depth of a node: roots are at depth 1.
    #[must_use]
    pub fn depth_of(&self, id: &str) -> Option<usize> {
        if !self.nodes.contains_key(id) {
            return None;
        }
        let mut depth = 1;
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            depth += 1;
            current = parent;
        }
        Some(depth)
    }

    /// The `A > B > C` path label from the root down to a node.
    #[must_use]
    pub fn path_label(&self, id: &str) -> Option<String> {
        let mut titles = vec![self.nodes.get(id)?.title.clone()];
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if let Some(node) = self.nodes.get(parent) {
                titles.push(node.title.clone());
            }
            current = parent;
        }
        titles.reverse();
        Some(titles.join(" > "))
    }

    /// Every `(id, path label)` pair whose depth does not exceed
    /// `max_depth`, in breadth-first order.
    #[must_use]
    pub fn paths_up_to(&self, max_depth: usize) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut queue: VecDeque<(String, usize)> = self
            .root_ids
            .iter()
            .map(|id| (id.clone(), 1))
            .collect();
        while let Some((id, depth)) = queue.pop_front() {
            if depth > max_depth {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                if let Some(label) = self.path_label(&id) {
                    out.push((id.clone(), label));
                }
                for child in &node.children {
                    queue.push_back((child.clone(), depth + 1));
                }
            }
        }
        out
    }

    /// Check the forest invariants: every child reference resolves, every
    /// node is reachable from exactly one root, and there are no cycles.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for root in &self.root_ids {
            if !self.nodes.contains_key(root) {
                return Err(Error::config(format!("unknown chapter root id '{root}'")));
            }
            queue.push_back(root);
        }
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                return Err(Error::config(format!(
                    "chapter '{id}' is reachable more than once"
                )));
            }
            let Some(node) = self.nodes.get(id) else {
                return Err(Error::config(format!("unknown chapter child id '{id}'")));
            };
            for child in &node.children {
                queue.push_back(child);
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(Error::config(
                "chapter structure has nodes unreachable from any root",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn node(title: &str) -> ChapterNode {
        ChapterNode::new(title, "grouped by topic", Vec::new())
    }

    #[test]
    fn derive_id_ignores_member_order() {
        let a = ChapterNode::derive_id("Python基础", &["id2".to_owned(), "id1".to_owned()]);
        let b = ChapterNode::derive_id("Python基础", &["id1".to_owned(), "id2".to_owned()]);
        let c = ChapterNode::derive_id("数据结构", &["id1".to_owned(), "id2".to_owned()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn attach_builds_paths_and_depths() {
        let mut structure = ChapterStructure::new();
        let root = node("Python");
        let root_id = root.id.clone();
        structure.insert_root(root);

        let child = node("数据结构");
        let child_id = child.id.clone();
        structure.attach_child(&root_id, child).unwrap();

        assert_eq!(structure.depth_of(&root_id), Some(1));
        assert_eq!(structure.depth_of(&child_id), Some(2));
        assert_eq!(
            structure.path_label(&child_id).unwrap(),
            "Python > 数据结构"
        );
        assert_eq!(structure.parent_of(&child_id), Some(root_id.as_str()));
        assert!(structure.validate().is_ok());
    }

    #[test]
    fn attach_to_unknown_parent_fails() {
        let mut structure = ChapterStructure::new();
        assert!(structure.attach_child("missing", node("x")).is_err());
    }

    #[test]
    fn paths_up_to_respects_depth_cap() {
        let mut structure = ChapterStructure::new();
        let root = node("root");
        let root_id = root.id.clone();
        structure.insert_root(root);
        let mid = node("mid");
        let mid_id = mid.id.clone();
        structure.attach_child(&root_id, mid).unwrap();
        let leaf = node("leaf");
        structure.attach_child(&mid_id, leaf).unwrap();

        let capped = structure.paths_up_to(2);
        assert_eq!(capped.len(), 2);
        assert!(capped.iter().all(|(_, label)| !label.contains("leaf")));
    }

    #[test]
    fn validate_catches_shared_child() {
        let mut structure = ChapterStructure::new();
        let a = node("a");
        let a_id = a.id.clone();
        let b = node("b");
        let b_id = b.id.clone();
        structure.insert_root(a);
        structure.insert_root(b);
        let shared = node("shared");
        let shared_id = shared.id.clone();
        structure.attach_child(&a_id, shared).unwrap();
        structure
            .nodes
            .get_mut(&b_id)
            .unwrap()
            .children
            .push(shared_id);

        assert!(structure.validate().is_err());
    }

    #[test]
    fn validate_catches_orphan() {
        let mut structure = ChapterStructure::new();
        let orphan = node("orphan");
        structure.nodes.insert(orphan.id.clone(), orphan);
        assert!(structure.validate().is_err());
    }
}
