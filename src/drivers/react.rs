//! Prompt-protocol ("ReAct") tool-call driver.
//!
//! Used when the provider cannot take tool schemas. The tools are described
//! in the system prompt and the model asks for one by replying with exactly
//!
//! ```text
//! ACTION: <tool_name>
//! INPUT: <free text>
//! ```
//!
//! Free text cannot carry a structured object, so the input is bound to the
//! tool's first declared parameter. Any reply that does not match is the
//! model's answer.

use std::sync::OnceLock;

use async_stream::try_stream;
use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use super::{EventStream, ToolTurn};
use crate::llm::{stream_completion, with_system_prompt, CompletionRequest};
use crate::types::{ChatMessage, StreamEvent, ToolArgs, ToolCall, ToolDefinition};

/// Parameter name used when the requested tool is not among the enabled ones.
const DEFAULT_INPUT_PARAMETER: &str = "query";

/// A tool request parsed from the model's text reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub tool_name: String,
    pub input: String,
}

fn action_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)ACTION:\s*(\w+)\s*[\r\n]+INPUT:(.*)").ok())
        .as_ref()
}

/// Parse an `ACTION:` / `INPUT:` request out of a model reply.
///
/// Keywords are case-sensitive. The input runs to the end of the reply and
/// is trimmed; an input that is empty after trimming is not a request.
pub fn parse_tool_request(reply: &str) -> Option<ToolRequest> {
    let captures = action_pattern()?.captures(reply)?;
    let tool_name = captures.get(1)?.as_str().to_string();
    let input = captures.get(2)?.as_str().trim();
    if input.is_empty() {
        return None;
    }
    Some(ToolRequest {
        tool_name,
        input: input.to_string(),
    })
}

/// Bind the free-text input to the requested tool's first parameter.
pub fn bind_input(tools: &[ToolDefinition], tool_name: &str, input: &str) -> ToolArgs {
    let key = tools
        .iter()
        .find(|t| t.name == tool_name)
        .and_then(|t| t.first_parameter())
        .unwrap_or(DEFAULT_INPUT_PARAMETER);
    let mut args = ToolArgs::new();
    args.insert(key.to_string(), Value::String(input.to_string()));
    args
}

/// The system prompt extended with the tool list and the reply protocol.
pub fn build_react_system_prompt(base: Option<&str>, tools: &[ToolDefinition]) -> String {
    let descriptions = tools
        .iter()
        .map(|tool| {
            let mut text = format!("{}: {}", tool.name, tool.description);
            for param in &tool.parameters {
                let detail = if param.description.is_empty() {
                    &param.kind
                } else {
                    &param.description
                };
                text.push_str(&format!("\n  - {}: {}", param.name, detail));
            }
            text
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let base = match base.filter(|b| !b.is_empty()) {
        Some(b) => format!("{b}\n\n"),
        None => String::new(),
    };

    format!(
        "{base}You have access to the following tools:\n\n\
         {descriptions}\n\n\
         To use a tool, respond with ONLY this exact format and nothing else:\n\
         ACTION: <tool_name>\n\
         INPUT: <input value>\n\n\
         After receiving the tool result, provide your complete final answer.\n\
         Only use a tool when you genuinely need current or specific information."
    )
}

/// The user message that hands the tool result back to the model.
pub fn tool_result_prompt(tool_name: &str, input: &str, result: &str) -> String {
    format!(
        "[{tool_name} result for \"{input}\"]\n{result}\n\n\
         Using the above result, please answer my previous question."
    )
}

pub fn run(turn: ToolTurn) -> EventStream {
    Box::pin(try_stream! {
        let augmented = build_react_system_prompt(turn.system_prompt.as_deref(), &turn.tools);
        let request = CompletionRequest::new(
            &turn.model,
            with_system_prompt(Some(augmented.as_str()), &turn.history),
        );
        let completion = turn.provider.complete_once(&request).await?;

        let Some(tool_request) = parse_tool_request(&completion.content) else {
            debug!(model = %turn.model, "reply has no tool request");
            if !completion.content.is_empty() {
                yield StreamEvent::chunk(completion.content);
            }
            yield StreamEvent::terminal();
            return;
        };

        info!(tool = %tool_request.tool_name, "prompt-protocol tool request");
        let args = bind_input(&turn.tools, &tool_request.tool_name, &tool_request.input);
        let call = ToolCall::new(tool_request.tool_name.clone(), args);
        yield StreamEvent::tool_call(&call);
        let output = turn.registry.execute(&call.name, &call.args).await;
        yield StreamEvent::tool_result(&call, output.clone());

        // The answer round goes back to the caller's own prompt, without the
        // protocol instructions.
        let mut history = turn.history.clone();
        history.push(ChatMessage::user(tool_result_prompt(
            &call.name,
            &tool_request.input,
            &output,
        )));
        let mut answer = stream_completion(
            turn.provider.as_ref(),
            &turn.model,
            &history,
            turn.system_prompt.as_deref(),
        )
        .await?;
        while let Some(chunk) = answer.next().await {
            yield StreamEvent::from(chunk);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::drivers::testing::{drain, logged_search_turn, search_turn, shape};
    use crate::error::LlmError;
    use crate::llm::testing::{Call, ScriptedProvider};
    use crate::types::{Completion, Role, ToolParameter};
    use serde_json::json;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    fn request(tool: &str, input: &str) -> Option<ToolRequest> {
        Some(ToolRequest {
            tool_name: tool.to_string(),
            input: input.to_string(),
        })
    }

    fn lookup_tool() -> ToolDefinition {
        ToolDefinition {
            name: "lookup".to_string(),
            description: "Look up a term".to_string(),
            parameters: vec![
                ToolParameter::string("term", "Term to look up"),
                ToolParameter::string("lang", ""),
            ],
            required: vec!["term".to_string()],
        }
    }

    // --- parse_tool_request ---

    #[test]
    fn test_parse_exact_protocol() {
        assert_eq!(
            parse_tool_request("ACTION: web_search\nINPUT: weather today"),
            request("web_search", "weather today")
        );
    }

    #[test]
    fn test_parse_tolerates_spacing_and_crlf() {
        assert_eq!(
            parse_tool_request("ACTION:web_search  \r\n\r\nINPUT:   seoul news  \n"),
            request("web_search", "seoul news")
        );
    }

    #[test]
    fn test_parse_after_preamble() {
        let reply = "I should look this up.\nACTION: web_search\nINPUT: rust 2024 edition";
        assert_eq!(parse_tool_request(reply), request("web_search", "rust 2024 edition"));
    }

    #[test]
    fn test_parse_input_runs_to_end_of_reply() {
        let reply = "ACTION: web_search\nINPUT: first line\nsecond line";
        assert_eq!(
            parse_tool_request(reply),
            request("web_search", "first line\nsecond line")
        );
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(parse_tool_request("action: web_search\ninput: x"), None);
        assert_eq!(parse_tool_request("Action: web_search\nInput: x"), None);
    }

    #[test]
    fn test_parse_requires_line_break_between_keywords() {
        assert_eq!(parse_tool_request("ACTION: web_search INPUT: x"), None);
    }

    #[test]
    fn test_parse_rejects_blank_input() {
        assert_eq!(parse_tool_request("ACTION: web_search\nINPUT:"), None);
        assert_eq!(parse_tool_request("ACTION: web_search\nINPUT:   \n\t"), None);
    }

    #[test]
    fn test_parse_plain_answer() {
        assert_eq!(parse_tool_request("The capital of Korea is Seoul."), None);
        assert_eq!(parse_tool_request(""), None);
    }

    #[test]
    fn test_parse_tool_name_is_identifier() {
        assert_eq!(parse_tool_request("ACTION: web-search\nINPUT: x"), None);
        assert_eq!(
            parse_tool_request("ACTION: search2\nINPUT: 서울 날씨"),
            request("search2", "서울 날씨")
        );
    }

    // --- prompt construction ---

    #[test]
    fn test_bind_input_uses_first_parameter() {
        let tools = vec![lookup_tool()];
        let args = bind_input(&tools, "lookup", "ownership");
        assert_eq!(args.len(), 1);
        assert_eq!(args["term"], "ownership");
    }

    #[test]
    fn test_bind_input_unknown_tool_defaults_to_query() {
        let args = bind_input(&[lookup_tool()], "translate", "hello");
        assert_eq!(args["query"], "hello");
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let prompt = build_react_system_prompt(Some("You are Ren."), &[lookup_tool()]);
        assert!(prompt.starts_with("You are Ren.\n\nYou have access to the following tools:\n\n"));
        assert!(prompt.contains("lookup: Look up a term\n  - term: Term to look up\n  - lang: string"));
        assert!(prompt.contains("ACTION: <tool_name>\nINPUT: <input value>"));

        let bare = build_react_system_prompt(None, &[lookup_tool()]);
        assert!(bare.starts_with("You have access"));
    }

    // --- driver ---

    #[test]
    fn test_tool_request_round() {
        rt().block_on(async {
            let provider = Arc::new(
                ScriptedProvider::new()
                    .on_once(Ok(Completion::text("ACTION: web_search\nINPUT: weather today")))
                    .on_stream(&["It is ", "sunny."]),
            );
            let (turn, log) = logged_search_turn(provider.clone(), "22C, clear");
            let out: Vec<StreamEvent> = drain(run(turn))
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .collect();

            assert_eq!(shape(&out), vec!["call", "result", "chunk", "chunk", "done"]);
            assert_eq!(
                *log.lock().unwrap(),
                vec![json!({ "query": "weather today" }).as_object().cloned().unwrap()]
            );
            match (&out[0], &out[1]) {
                (
                    StreamEvent::ToolCall { call_id, args, .. },
                    StreamEvent::ToolResult { call_id: result_id, result, .. },
                ) => {
                    assert_eq!(call_id, result_id);
                    assert_eq!(args["query"], "weather today");
                    assert_eq!(result, "22C, clear");
                }
                other => panic!("unexpected events {other:?}"),
            }

            let requests = provider.requests();
            let (_, first) = &requests[0];
            assert!(first.tools.is_empty());
            assert!(first.messages[0].content.contains("ACTION: <tool_name>"));

            let (call, answer) = &requests[1];
            assert_eq!(*call, Call::Streaming);
            assert_eq!(answer.messages[0].content, "You are Hana.");
            let last = answer.messages.last().unwrap();
            assert_eq!(last.role, Role::User);
            assert!(last.content.contains("22C, clear"));
            assert!(last.content.contains("\"weather today\""));
            assert_eq!(answer.messages.len(), 3);
        });
    }

    #[test]
    fn test_plain_reply_is_the_answer() {
        rt().block_on(async {
            let provider = Arc::new(
                ScriptedProvider::new().on_once(Ok(Completion::text("Seoul."))),
            );
            let out: Vec<StreamEvent> = drain(run(search_turn(provider.clone(), "unused")))
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .collect();
            assert_eq!(out, vec![StreamEvent::chunk("Seoul."), StreamEvent::terminal()]);
            assert_eq!(provider.requests().len(), 1);
        });
    }

    #[test]
    fn test_unknown_tool_is_still_executed() {
        rt().block_on(async {
            let provider = Arc::new(
                ScriptedProvider::new()
                    .on_once(Ok(Completion::text("ACTION: translate\nINPUT: hello")))
                    .on_stream(&["Sorry."]),
            );
            let (turn, log) = logged_search_turn(provider, "unused");
            let out: Vec<StreamEvent> = drain(run(turn))
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .collect();
            assert!(log.lock().unwrap().is_empty());
            assert_eq!(
                out[1],
                StreamEvent::ToolResult {
                    call_id: match &out[0] {
                        StreamEvent::ToolCall { call_id, .. } => call_id.clone(),
                        other => panic!("expected tool call, got {other:?}"),
                    },
                    tool_name: "translate".to_string(),
                    result: "Tool \"translate\" is not available.".to_string(),
                }
            );
        });
    }

    #[test]
    fn test_transport_error_propagates() {
        rt().block_on(async {
            let provider = Arc::new(ScriptedProvider::new().on_once(Err(LlmError::Timeout { secs: 120 })));
            let out = drain(run(search_turn(provider, "unused"))).await;
            assert_eq!(out.len(), 1);
            assert!(matches!(out[0], Err(LlmError::Timeout { secs: 120 })));
        });
    }
}
