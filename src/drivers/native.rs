//! Native tool-call driver.
//!
//! 1. One non-streaming request with the tool schemas attached.
//! 2. A 400/422 answer means the provider cannot take tool schemas: the
//!    whole turn is handed to the prompt-protocol driver.
//! 3. No tool calls: the reply text is the answer.
//! 4. Otherwise each call is executed in provider order and the answer is
//!    streamed from a second, tool-less request over the extended messages.

use async_stream::try_stream;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::{react, EventStream, ToolTurn};
use crate::llm::{with_system_prompt, CompletionRequest};
use crate::types::{ChatMessage, StreamEvent};

pub fn run(turn: ToolTurn) -> EventStream {
    Box::pin(try_stream! {
        let mut messages = with_system_prompt(turn.system_prompt.as_deref(), &turn.history);
        let request = CompletionRequest::new(&turn.model, messages.clone())
            .with_tools(turn.tools.clone());

        let result = turn.provider.complete_once(&request).await;
        if let Err(err) = &result {
            if err.is_capability_rejection() {
                info!(
                    provider = turn.provider.name(),
                    model = %turn.model,
                    error = %err,
                    "native tool calling rejected, using prompt protocol"
                );
                let mut fallback = react::run(turn);
                while let Some(event) = fallback.next().await {
                    yield event?;
                }
                return;
            }
        }
        let completion = result?;

        if !completion.has_tool_calls() {
            debug!(model = %turn.model, "no tool calls requested");
            if !completion.content.is_empty() {
                yield StreamEvent::chunk(completion.content);
            }
            yield StreamEvent::terminal();
            return;
        }

        messages.push(ChatMessage::assistant_with_tool_calls(
            completion.content.clone(),
            completion.tool_calls.clone(),
        ));
        for call in &completion.tool_calls {
            yield StreamEvent::tool_call(call);
            let output = turn.registry.execute(&call.name, &call.args).await;
            yield StreamEvent::tool_result(call, output.clone());
            messages.push(ChatMessage::tool_result(&call.id, output));
        }

        let followup = CompletionRequest::new(&turn.model, messages);
        let mut answer = turn.provider.complete_streaming(&followup).await?;
        while let Some(chunk) = answer.next().await {
            yield StreamEvent::from(chunk);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::drivers::testing::{drain, search_turn, shape};
    use crate::error::LlmError;
    use crate::llm::testing::{Call, ScriptedProvider};
    use crate::types::{Completion, Role, ToolCall};
    use serde_json::json;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    fn search_call(query: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: "web_search".to_string(),
            args: json!({ "query": query }).as_object().cloned().unwrap(),
        }
    }

    fn events(results: Vec<Result<StreamEvent, LlmError>>) -> Vec<StreamEvent> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_tool_round_then_streamed_answer() {
        rt().block_on(async {
            let provider = Arc::new(
                ScriptedProvider::new()
                    .on_once(Ok(Completion {
                        content: String::new(),
                        tool_calls: vec![search_call("x")],
                    }))
                    .on_stream(&["Found: 3 results"]),
            );
            let out = events(drain(run(search_turn(provider.clone(), "3 results"))).await);

            assert_eq!(shape(&out), vec!["call", "result", "chunk", "done"]);
            assert_eq!(
                out[1],
                StreamEvent::ToolResult {
                    call_id: "call_1".to_string(),
                    tool_name: "web_search".to_string(),
                    result: "3 results".to_string(),
                }
            );
            assert_eq!(out[2], StreamEvent::chunk("Found: 3 results"));

            let requests = provider.requests();
            assert_eq!(requests.len(), 2);
            assert_eq!(requests[0].0, Call::Once);
            assert_eq!(requests[0].1.tools.len(), 1);

            let (call, followup) = &requests[1];
            assert_eq!(*call, Call::Streaming);
            assert!(followup.tools.is_empty());
            let roles: Vec<Role> = followup.messages.iter().map(|m| m.role).collect();
            assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::Tool]);
            assert_eq!(followup.messages[2].tool_calls[0].id, "call_1");
            assert_eq!(followup.messages[3].tool_call_id.as_deref(), Some("call_1"));
            assert_eq!(followup.messages[3].content, "3 results");
        });
    }

    #[test]
    fn test_no_tool_calls_answers_directly() {
        rt().block_on(async {
            let provider = Arc::new(
                ScriptedProvider::new().on_once(Ok(Completion::text("It is sunny."))),
            );
            let out = events(drain(run(search_turn(provider.clone(), "unused"))).await);

            assert_eq!(
                out,
                vec![StreamEvent::chunk("It is sunny."), StreamEvent::terminal()]
            );
            assert_eq!(provider.requests().len(), 1);
        });
    }

    #[test]
    fn test_empty_reply_only_terminates() {
        rt().block_on(async {
            let provider = Arc::new(ScriptedProvider::new().on_once(Ok(Completion::default())));
            let out = events(drain(run(search_turn(provider, "unused"))).await);
            assert_eq!(out, vec![StreamEvent::terminal()]);
        });
    }

    #[test]
    fn test_multiple_calls_run_in_provider_order() {
        rt().block_on(async {
            let mut second = search_call("y");
            second.id = "call_2".to_string();
            let provider = Arc::new(
                ScriptedProvider::new()
                    .on_once(Ok(Completion {
                        content: String::new(),
                        tool_calls: vec![search_call("x"), second],
                    }))
                    .on_stream(&["done"]),
            );
            let out = events(drain(run(search_turn(provider.clone(), "r"))).await);

            assert_eq!(
                shape(&out),
                vec!["call", "result", "call", "result", "chunk", "done"]
            );
            let ids: Vec<&str> = out
                .iter()
                .filter_map(|e| match e {
                    StreamEvent::ToolCall { call_id, .. } => Some(call_id.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(ids, vec!["call_1", "call_2"]);
            assert_eq!(provider.requests()[1].1.messages.len(), 5);
        });
    }

    #[test]
    fn test_server_error_is_fatal() {
        rt().block_on(async {
            let provider = Arc::new(ScriptedProvider::new().on_once(Err(LlmError::Http {
                status: 500,
                body: "boom".to_string(),
            })));
            let out = drain(run(search_turn(provider.clone(), "unused"))).await;

            assert_eq!(out.len(), 1);
            assert!(matches!(out[0], Err(LlmError::Http { status: 500, .. })));
            assert_eq!(provider.requests().len(), 1);
        });
    }

    #[test]
    fn test_rejection_hands_off_to_prompt_protocol() {
        rt().block_on(async {
            let provider = Arc::new(
                ScriptedProvider::new()
                    .on_once(Err(LlmError::Http {
                        status: 400,
                        body: "model does not support tools".to_string(),
                    }))
                    .on_once(Ok(Completion::text("ACTION: web_search\nINPUT: weather today")))
                    .on_stream(&["Sunny"]),
            );
            let out = events(drain(run(search_turn(provider.clone(), "22C"))).await);

            assert_eq!(shape(&out), vec!["call", "result", "chunk", "done"]);
            match &out[0] {
                StreamEvent::ToolCall { tool_name, args, .. } => {
                    assert_eq!(tool_name, "web_search");
                    assert_eq!(args["query"], "weather today");
                }
                other => panic!("expected tool call, got {other:?}"),
            }

            let requests = provider.requests();
            assert_eq!(requests.len(), 3);
            assert!(requests[1].1.tools.is_empty());
        });
    }
}
