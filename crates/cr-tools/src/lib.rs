//! cr-tools: Tools available to the research agents
//!
//! - Web: search the web and hand back the provider's raw payload

pub mod web;

use std::sync::Arc;

use cr_core::{RetryPolicy, Tool};

pub use web::{hits, top_snippets, SearchConfig, SearchHit, WebSearchTool, SEARCH_TOOL_NAME};

/// The web search tool, wrapped in the retry policy.
pub fn create_search_tool(config: SearchConfig, retry: RetryPolicy) -> Arc<dyn Tool> {
    Arc::new(WebSearchTool::new(config).with_retry(retry))
}
