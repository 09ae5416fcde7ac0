//! HTTP request tool.
//!
//! A [`RequestTool`] is declared per request with a URL, method, optional
//! headers, and optional schemas for query parameters and JSON body. Each
//! action performs exactly one HTTP call.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;

use super::Tool;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    /// HTTP GET.
    Get,
    /// HTTP POST.
    Post,
    /// HTTP PUT.
    Put,
    /// HTTP PATCH.
    Patch,
    /// HTTP DELETE.
    Delete,
}

impl RequestMethod {
    /// The wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    const fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A declared HTTP capability the model can invoke.
#[derive(Debug, Clone)]
pub struct RequestTool {
    name: String,
    description: String,
    url: String,
    method: RequestMethod,
    headers: HashMap<String, String>,
    request_params: Option<Map<String, Value>>,
    request_json: Option<Map<String, Value>>,
    timeout: Duration,
}

impl RequestTool {
    /// Create a new HTTP tool.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        method: RequestMethod,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            method,
            headers: HashMap::new(),
            request_params: None,
            request_json: None,
            timeout: Duration::from_secs(180),
        }
    }

    /// Set request headers.
    #[must_use]
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Declare the query-parameter schema (JSON Schema property map).
    #[must_use]
    pub fn request_params(mut self, properties: Map<String, Value>) -> Self {
        self.request_params = Some(properties);
        self
    }

    /// Declare the JSON-body schema (JSON Schema property map).
    #[must_use]
    pub fn request_json(mut self, properties: Map<String, Value>) -> Self {
        self.request_json = Some(properties);
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Split query parameters already embedded in the URL and merge them
    /// under any model-supplied ones (the model's values win).
    fn merged_query(&self, supplied: Option<&Value>) -> (String, Vec<(String, String)>) {
        let (base, embedded) = match self.url.split_once('?') {
            Some((base, query)) => {
                let pairs = query
                    .split('&')
                    .filter_map(|pair| {
                        pair.split_once('=')
                            .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    })
                    .collect::<Vec<_>>();
                (base.to_owned(), pairs)
            }
            None => (self.url.clone(), Vec::new()),
        };

        let mut merged: Vec<(String, String)> = embedded;
        if let Some(Value::Object(params)) = supplied {
            for (key, value) in params {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                merged.retain(|(k, _)| k != key);
                merged.push((key.clone(), rendered));
            }
        }
        (base, merged)
    }
}

#[async_trait]
impl Tool for RequestTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        if let Some(params) = &self.request_params {
            properties.insert(
                "request_params".to_owned(),
                serde_json::json!({
                    "type": "object",
                    "description": "The parameters to send with the request. \
                                    Required for GET and DELETE requests. \
                                    Optional for POST, PUT, and PATCH requests.",
                    "properties": params,
                    "required": params.keys().collect::<Vec<_>>(),
                    "additionalProperties": false,
                }),
            );
            required.push(Value::String("request_params".to_owned()));
        }

        if let Some(body) = &self.request_json {
            properties.insert(
                "request_json".to_owned(),
                serde_json::json!({
                    "type": "object",
                    "description": "The JSON body to send with the request. \
                                    Required for POST, PUT, and PATCH requests.",
                    "properties": body,
                    "required": body.keys().collect::<Vec<_>>(),
                    "additionalProperties": false,
                }),
            );
            required.push(Value::String("request_json".to_owned()));
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, ToolError> {
        let (url, query) = self.merged_query(args.get("request_params"));

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ToolError::execution(e.to_string()))?;

        let mut request = client.request(self.method.to_reqwest(), &url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = args.get("request_json") {
            request = request.json(body);
        }

        tracing::debug!(
            target: "ospa::tool",
            tool = %self.name,
            method = self.method.as_str(),
            url = %url,
            "http tool request"
        );

        let response = request.send().await?;
        let status_code = response.status().as_u16();
        let text = response.text().await?;
        let content = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        let mut result = Map::new();
        result.insert(
            "status_code".to_owned(),
            Value::Number(status_code.into()),
        );
        result.insert("content".to_owned(), content);
        Ok(result)
    }
}
