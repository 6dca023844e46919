//! Web search tool backed by the DuckDuckGo Instant Answer API.
//!
//! The API returns structured data (direct answers, abstracts, definitions
//! and related topics) rather than a ranked result list, which is enough for
//! the "look up a fact" use the agents have for it.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::Tool;
use crate::types::{ToolArgs, ToolParameter};

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_RELATED: usize = 5;

/// Tool that searches the web for current information.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    /// Point the tool at a different Instant Answer compatible endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn instant_answer(&self, query: &str) -> Result<Value> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .header("User-Agent", concat!("expandai/", env!("CARGO_PKG_VERSION")))
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        // DuckDuckGo labels the body application/x-javascript, so parse by hand.
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Render an Instant Answer payload as plain text for the model.
///
/// Related topics are only used when the payload has nothing more direct.
pub fn format_instant_answer(data: &Value) -> Option<String> {
    let text = |key: &str| data[key].as_str().filter(|s| !s.trim().is_empty());
    let mut parts: Vec<String> = Vec::new();

    if let Some(answer) = text("Answer") {
        parts.push(format!("Direct answer: {answer}"));
    }
    if let Some(summary) = text("AbstractText") {
        parts.push(format!("Summary: {summary}"));
        if let Some(url) = text("AbstractURL") {
            parts.push(format!("Source: {url}"));
        }
    }
    if let Some(definition) = text("Definition") {
        parts.push(format!("Definition: {definition}"));
    }

    if parts.is_empty() {
        // Grouped topics ({"Name": ..., "Topics": [...]}) have no Text and are skipped.
        let related: Vec<String> = data["RelatedTopics"]
            .as_array()
            .map(|topics| {
                topics
                    .iter()
                    .filter_map(|t| {
                        let text = t["Text"].as_str().filter(|s| !s.is_empty())?;
                        let url = t["FirstURL"].as_str().filter(|s| !s.is_empty())?;
                        Some(format!("• {text}\n  {url}"))
                    })
                    .take(MAX_RELATED)
                    .collect()
            })
            .unwrap_or_default();
        if !related.is_empty() {
            parts.push("Related results:".to_string());
            parts.extend(related);
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo to get current information, news, facts, or answers. \
         Use this whenever the user asks about recent events, specific facts you are unsure \
         about, or anything that would benefit from up-to-date information."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::string(
            "query",
            "The search query. Be specific and concise for better results.",
        )]
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String> {
        let query = match args.get("query") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        if query.is_empty() {
            return Ok("No search query provided.".to_string());
        }
        debug!(query = %query, "web_search");

        let formatted = match self.instant_answer(&query).await {
            Ok(data) => format_instant_answer(&data),
            Err(e) => {
                // Search outages read as "nothing found" so the model can still answer.
                warn!(query = %query, error = %e, "instant answer lookup failed");
                None
            }
        };

        Ok(formatted.unwrap_or_else(|| {
            format!("No results found for \"{query}\". Try rephrasing your query.")
        }))
    }
}
