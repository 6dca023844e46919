//! Tool System module.
//!
//! This module defines the `Tool` trait and `ToolRegistry` that together
//! form the tool execution framework.
//!
//! Key concepts:
//! - **Tool trait**: every tool implements this trait, providing its name,
//!   description, ordered parameter list, and an execute method
//! - **ToolRegistry**: holds all available tools, resolves a turn's enabled
//!   tool names into definitions and dispatches calls by name
//! - **Never fails**: `ToolRegistry::execute` always returns text. Unknown
//!   tools, missing arguments and tool failures become result strings the
//!   model can read, so a bad tool call never aborts a turn.

pub mod web_search;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::{ToolArgs, ToolDefinition, ToolParameter};

/// Results longer than this are shortened in logs.
const LOG_SUMMARY_CHARS: usize = 200;

/// Trait that all tools must implement.
///
/// Each tool is a capability that the LLM can invoke.
/// Tools receive a JSON object of arguments and return a string result.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "web_search").
    fn name(&self) -> &str;

    /// A human-readable description of what this tool does.
    /// The LLM reads this to decide when to use the tool.
    fn description(&self) -> &str;

    /// Declared parameters, in order. The first one receives the free-text
    /// input of the prompt-protocol fallback.
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Names of the parameters that must be present. Defaults to all of them.
    fn required(&self) -> Vec<String> {
        self.parameters().into_iter().map(|p| p.name).collect()
    }

    /// Execute the tool with the given arguments.
    /// Returns a string result that will be sent back to the LLM.
    async fn execute(&self, args: &ToolArgs) -> Result<String>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            required: self.required(),
        }
    }
}

/// Registry of the tools a turn may use.
///
/// Read-only once built; shared across concurrent turns behind an `Arc`.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Lookups return the first tool registered under a name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Resolve enabled tool names into definitions.
    ///
    /// Keeps the order of `names`; unknown names and repeats are dropped.
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        let mut seen: Vec<&str> = Vec::new();
        let mut definitions = Vec::new();
        for name in names {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            match self.find(name) {
                Some(tool) => definitions.push(tool.to_definition()),
                None => warn!(tool = %name, "enabled tool is not registered, skipping"),
            }
        }
        definitions
    }

    /// Execute a tool by name. Never fails; problems come back as text.
    pub async fn execute(&self, name: &str, args: &ToolArgs) -> String {
        info!(tool = %name, args = %serde_json::Value::Object(args.clone()), "executing tool");

        let Some(tool) = self.find(name) else {
            warn!(tool = %name, "tool is not available");
            return format!("Tool \"{name}\" is not available.");
        };

        if let Some(missing) = tool
            .required()
            .into_iter()
            .find(|key| matches!(args.get(key), None | Some(serde_json::Value::Null)))
        {
            warn!(tool = %name, argument = %missing, "missing required argument");
            return format!("Tool error: missing required argument '{missing}'");
        }

        let result = match tool.execute(args).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                format!("Tool error: {e}")
            }
        };
        info!(tool = %name, summary = %summarize(&result), "tool result");
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(result: &str) -> String {
    if result.chars().count() > LOG_SUMMARY_CHARS {
        let head: String = result.chars().take(LOG_SUMMARY_CHARS).collect();
        format!("{head}…")
    } else {
        result.to_string()
    }
}

/// Create a ToolRegistry with all built-in tools registered.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(web_search::WebSearchTool::new()));
    registry
}


#[cfg(test)]
mod tests {
    use super::testing::StaticTool;
    use super::*;
    use serde_json::json;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    fn args(value: serde_json::Value) -> ToolArgs {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(StaticTool::new("web_search", &["query"], "3 results")));
        registry.register(Box::new(StaticTool::new("lookup", &["term", "lang"], "found")));
        registry.register(Box::new(StaticTool::failing("flaky", &["x"], "upstream down")));
        registry
    }

    #[test]
    fn test_definitions_preserve_order_and_skip_unknown() {
        let names: Vec<String> = ["lookup", "nope", "web_search", "lookup"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let defs = registry().definitions(&names);
        let resolved: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(resolved, vec!["lookup", "web_search"]);
        assert_eq!(defs[0].first_parameter(), Some("term"));
        assert_eq!(defs[0].required, vec!["term", "lang"]);
    }

    #[test]
    fn test_definitions_empty_when_nothing_enabled() {
        assert!(registry().definitions(&[]).is_empty());
        assert!(registry().definitions(&["ghost".to_string()]).is_empty());
    }

    #[test]
    fn test_execute_known_tool() {
        rt().block_on(async {
            let result = registry()
                .execute("web_search", &args(json!({ "query": "x" })))
                .await;
            assert_eq!(result, "3 results");
        });
    }

    #[test]
    fn test_execute_unknown_tool_returns_text() {
        rt().block_on(async {
            let result = registry().execute("translate", &ToolArgs::new()).await;
            assert_eq!(result, "Tool \"translate\" is not available.");
        });
    }

    #[test]
    fn test_execute_missing_required_argument() {
        rt().block_on(async {
            let result = registry()
                .execute("lookup", &args(json!({ "term": "rust", "lang": null })))
                .await;
            assert_eq!(result, "Tool error: missing required argument 'lang'");
        });
    }

    #[test]
    fn test_execute_tool_failure_becomes_text() {
        rt().block_on(async {
            let result = registry().execute("flaky", &args(json!({ "x": 1 }))).await;
            assert_eq!(result, "Tool error: upstream down");
        });
    }

    #[test]
    fn test_summarize_truncates_long_results() {
        let long = "가".repeat(300);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), LOG_SUMMARY_CHARS + 1);
        assert!(summary.ends_with('…'));
        assert_eq!(summarize("short"), "short");
    }

    #[test]
    fn test_default_registry_has_web_search() {
        let definitions = create_default_registry().definitions(&["web_search".to_string()]);
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].first_parameter(), Some("query"));
    }
}
