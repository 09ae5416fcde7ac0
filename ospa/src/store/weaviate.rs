//! Weaviate-backed vector store.
//!
//! Collections and objects go through the REST surface; semantic recall
//! goes through GraphQL `nearVector` search. One class per agent, one
//! `default` vector per object.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::feedback::Feedback;
use crate::setting::VectorDbSetting;

use super::{VectorStore, collection_name};

const FEEDBACK_PROPERTIES: [&str; 6] = [
    "agent_name",
    "observation_name",
    "observation_content",
    "action_name",
    "action_content",
    "state_name",
];

/// Client for a Weaviate instance.
#[derive(Debug, Clone)]
pub struct WeaviateStore {
    setting: VectorDbSetting,
    client: reqwest::Client,
}

impl WeaviateStore {
    /// Create a store for the given configuration.
    pub fn new(setting: VectorDbSetting) -> Result<Self> {
        reqwest::Url::parse(&setting.url)
            .map_err(|e| Error::config(format!("invalid vector DB URL '{}': {e}", setting.url)))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { setting, client })
    }

    /// Create a store from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(VectorDbSetting::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.setting.url.trim_end_matches('/'))
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(key) = &self.setting.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        req
    }

    fn feedback_from_properties(properties: &Value) -> Feedback {
        let text = |key: &str| {
            properties
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Feedback {
            agent_name: text("agent_name"),
            observation_name: text("observation_name"),
            observation_content: text("observation_content"),
            action_name: text("action_name"),
            action_content: text("action_content"),
            state_name: text("state_name"),
        }
    }

    /// Build the stored property map. `agent_name` comes from the
    /// collection being written, not from the feedback value, so a
    /// mislabeled feedback cannot leak into another agent's collection.
    fn feedback_properties(agent_name: &str, feedback: &Feedback) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "agent_name".to_owned(),
            Value::String(agent_name.to_owned()),
        );
        map.insert(
            "observation_name".to_owned(),
            Value::String(feedback.observation_name.clone()),
        );
        map.insert(
            "observation_content".to_owned(),
            Value::String(feedback.observation_content.clone()),
        );
        map.insert(
            "action_name".to_owned(),
            Value::String(feedback.action_name.clone()),
        );
        map.insert(
            "action_content".to_owned(),
            Value::String(feedback.action_content.clone()),
        );
        map.insert(
            "state_name".to_owned(),
            Value::String(feedback.state_name.clone()),
        );
        map
    }

    async fn check(&self, response: reqwest::Response, operation: &str) -> Result<Value> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::upstream_status(
                status.as_u16(),
                format!("vector store {operation} failed: {text}"),
            ));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::upstream(format!("vector store {operation}: unparsable reply: {e}")))
    }
}

#[async_trait]
impl VectorStore for WeaviateStore {
    async fn ensure_collection(&self, agent_name: &str) -> Result<()> {
        let class = collection_name(agent_name);
        let probe = self
            .request(reqwest::Method::GET, self.url(&format!("/v1/schema/{class}")))
            .send()
            .await?;
        if probe.status().is_success() {
            return Ok(());
        }

        let properties: Vec<Value> = FEEDBACK_PROPERTIES
            .iter()
            .map(|name| json!({ "name": name, "dataType": ["text"] }))
            .collect();
        let body = json!({
            "class": class,
            "description": "Agent feedback exemplars",
            "vectorizer": "none",
            "properties": properties,
        });

        let response = self
            .request(reqwest::Method::POST, self.url("/v1/schema"))
            .json(&body)
            .send()
            .await?;
        self.check(response, "create collection").await?;
        tracing::info!(target: "ospa::store", class = %class, "created feedback collection");
        Ok(())
    }

    async fn upsert(&self, agent_name: &str, feedback: &Feedback, vector: &[f32]) -> Result<()> {
        let class = collection_name(agent_name);
        let body = json!({
            "class": class,
            "properties": Self::feedback_properties(agent_name, feedback),
            "vector": vector,
        });
        let response = self
            .request(reqwest::Method::POST, self.url("/v1/objects"))
            .json(&body)
            .send()
            .await?;
        self.check(response, "upsert").await?;
        Ok(())
    }

    async fn query_by_vector(
        &self,
        agent_name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Feedback>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let class = collection_name(agent_name);
        let vector_json = serde_json::to_string(vector)
            .map_err(|e| Error::upstream(format!("unencodable query vector: {e}")))?;
        let fields = FEEDBACK_PROPERTIES.join(" ");
        let query = format!(
            "{{ Get {{ {class}(limit: {top_k}, nearVector: {{vector: {vector_json}}}) {{ {fields} }} }} }}"
        );

        let response = self
            .request(reqwest::Method::POST, self.url("/v1/graphql"))
            .json(&json!({ "query": query }))
            .send()
            .await?;
        let body = self.check(response, "vector query").await?;

        let hits = body
            .pointer(&format!("/data/Get/{class}"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(hits.iter().map(Self::feedback_from_properties).collect())
    }

    async fn list(&self, agent_name: &str, offset: usize, limit: usize) -> Result<Vec<Feedback>> {
        let class = collection_name(agent_name);
        let url = self.url(&format!(
            "/v1/objects?class={class}&offset={offset}&limit={limit}"
        ));
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let body = self.check(response, "list").await?;

        let objects = body
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(objects
            .iter()
            .filter_map(|obj| obj.get("properties"))
            .map(Self::feedback_from_properties)
            .collect())
    }

    async fn delete_collection(&self, agent_name: &str) -> Result<()> {
        let class = collection_name(agent_name);
        let response = self
            .request(
                reqwest::Method::DELETE,
                self.url(&format!("/v1/schema/{class}")),
            )
            .send()
            .await?;
        // Deleting a collection that never existed is not an error.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        self.check(response, "delete collection").await?;
        Ok(())
    }
}
