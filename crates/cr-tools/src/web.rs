//! Web search over a Tavily-compatible API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use cr_core::{
    retry, Error, PropertySchema, RetryPolicy, Tool, ToolDefinition, ToolOutput, ToolParameters,
};

pub const SEARCH_TOOL_NAME: &str = "tavily_search_results_json";

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

// =============================================================================
// Search Configuration
// =============================================================================

/// Settings for the search backend. Every request carries the same options;
/// only the query varies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_results: u32,
    /// "basic" or "advanced"
    pub search_depth: String,
    pub include_answer: bool,
    pub include_raw_content: bool,
    pub include_images: bool,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_results: 10,
            search_depth: "advanced".to_string(),
            include_answer: true,
            include_raw_content: true,
            include_images: true,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    search_depth: &'a str,
    include_answer: bool,
    include_raw_content: bool,
    include_images: bool,
}

/// One ranked hit. Unknown fields in the payload are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Parse the hits out of a raw search payload, skipping malformed rows.
pub fn hits(payload: &Value) -> Vec<SearchHit> {
    payload
        .get("results")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| serde_json::from_value::<SearchHit>(row.clone()).ok())
                .filter(|hit| !hit.url.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// The `content` snippets of the first `limit` hits.
pub fn top_snippets(payload: &Value, limit: usize) -> Vec<String> {
    hits(payload)
        .into_iter()
        .take(limit)
        .map(|hit| hit.content)
        .collect()
}

// =============================================================================
// Web Search Tool
// =============================================================================

pub struct WebSearchTool {
    client: Client,
    config: SearchConfig,
    retry: RetryPolicy,
}

impl WebSearchTool {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent("company-research/0.1.0")
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            config,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn request_body<'a>(&'a self, query: &'a str) -> SearchRequest<'a> {
        SearchRequest {
            query,
            max_results: self.config.max_results,
            search_depth: &self.config.search_depth,
            include_answer: self.config.include_answer,
            include_raw_content: self.config.include_raw_content,
            include_images: self.config.include_images,
        }
    }

    /// Run one search and return the provider's raw JSON payload.
    pub async fn search(&self, query: &str) -> Result<Value, Error> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::config("No search API key configured (TAVILY_API_KEY)"))?;

        retry(&self.retry, SEARCH_TOOL_NAME, || self.search_once(api_key, query)).await
    }

    async fn search_once(&self, api_key: &str, query: &str) -> Result<Value, Error> {
        debug!(query, max_results = self.config.max_results, "Web search request");

        let response = self
            .client
            .post(format!("{}/search", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&self.request_body(query))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("search timed out: {e}"))
                } else {
                    Error::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Web search failed");
            return Err(status_error(status.as_u16(), body));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::tool(SEARCH_TOOL_NAME, format!("Failed to parse response: {e}")))?;

        debug!(hits = hits(&payload).len(), "Web search response");
        Ok(payload)
    }
}

fn status_error(status: u16, body: String) -> Error {
    match status {
        401 | 403 => Error::auth(body),
        429 => Error::rate_limit(body),
        s if s >= 500 => Error::api(s, body),
        s => Error::tool(SEARCH_TOOL_NAME, format!("HTTP error {s}: {body}")),
    }
}

#[derive(Deserialize)]
struct WebSearchArgs {
    query: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "A search engine optimized for comprehensive, accurate, and trusted results. \
         Useful for when you need to answer questions about current events. \
         Input should be a search query."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property(
                "query",
                PropertySchema::string("search query to look up"),
                true,
            ),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, Error> {
        let args: WebSearchArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool(SEARCH_TOOL_NAME, format!("Invalid arguments: {}", e)))?;

        if args.query.trim().is_empty() {
            return Err(Error::tool(SEARCH_TOOL_NAME, "Empty search query"));
        }

        let payload = self.search(&args.query).await?;
        Ok(ToolOutput::success(payload.to_string()))
    }
}
