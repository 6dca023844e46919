//! Ollama LLM provider implementation.
//!
//! - **Endpoint**: `POST {base}/api/chat` for both streaming and
//!   non-streaming completions, `GET {base}/api/tags` for model listing
//! - **Streaming**: one JSON object per line, the last one has `"done": true`
//! - **Tool calls**: `message.tool_calls[].function` with object arguments
//!   and no call IDs, so IDs are generated locally

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::framing::{decode_stream, Framing};
use super::{arguments_object, ChunkStream, CompletionRequest, LlmProvider};
use crate::error::{ensure_success, LlmError};
use crate::types::{Completion, Role, ToolArgs, ToolCall};

const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(5);

/// Ollama API client.
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

// --- API Request Types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Serialize, Deserialize, Debug)]
struct ApiToolCall {
    function: ApiFunctionCall,
}

#[derive(Serialize, Deserialize, Debug)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// --- API Response Types ---

#[derive(Deserialize, Debug)]
struct ApiResponse {
    #[serde(default)]
    message: Option<ApiResponseMessage>,
}

#[derive(Deserialize, Debug)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize, Debug)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize, Debug)]
struct TagEntry {
    name: String,
}

// --- Implementation ---

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            request_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn build_api_request<'a>(&self, request: &'a CompletionRequest, stream: bool) -> ApiRequest<'a> {
        let messages = request
            .messages
            .iter()
            .map(|msg| ApiMessage {
                role: msg.role.as_str(),
                content: msg.content.clone(),
                tool_calls: match msg.role {
                    Role::Assistant => msg
                        .tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            function: ApiFunctionCall {
                                name: tc.name.clone(),
                                arguments: Value::Object(tc.args.clone()),
                            },
                        })
                        .collect(),
                    _ => vec![],
                },
            })
            .collect();

        ApiRequest {
            model: &request.model,
            messages,
            tools: request.tools.iter().map(|t| t.to_function_schema()).collect(),
            stream,
        }
    }

    fn parse_response(api_response: ApiResponse) -> Result<Completion, LlmError> {
        let message = api_response.message.ok_or_else(|| LlmError::Decode {
            reason: "response has no message".to_string(),
        })?;

        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let args: ToolArgs = arguments_object(&tc.function.name, tc.function.arguments)?;
                Ok(ToolCall::new(tc.function.name, args))
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        Ok(Completion {
            content: message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    async fn post_chat(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = self.endpoint("/api/chat");
        let body = self.build_api_request(request, stream);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream,
            "ollama chat request"
        );

        let mut builder = self.client.post(&url).json(&body);
        // Streaming answers are bounded only by the provider closing the body.
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::from_send(&url, self.request_timeout.as_secs(), e))?;
        ensure_success(response).await
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete_once(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let response = self.post_chat(request, false).await?;
        let api_response: ApiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    secs: self.request_timeout.as_secs(),
                }
            } else {
                LlmError::Decode {
                    reason: e.to_string(),
                }
            }
        })?;
        Self::parse_response(api_response)
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, LlmError> {
        let response = self.post_chat(request, true).await?;
        Ok(decode_stream(response.bytes_stream(), Framing::Ndjson))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = self.endpoint("/api/tags");
        let response = self
            .client
            .get(&url)
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await
            .map_err(|e| LlmError::from_send(&url, LIST_MODELS_TIMEOUT.as_secs(), e))?;
        let tags: TagsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::Decode {
                reason: e.to_string(),
            })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn name(&self) -> &str {
        "Ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{serve_once, serve_stalled};
    use crate::types::{ChatMessage, StreamChunk, ToolDefinition, ToolParameter};
    use futures_util::StreamExt;
    use serde_json::json;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    fn provider(base_url: &str) -> OllamaProvider {
        OllamaProvider::new(base_url, Duration::from_secs(5))
    }

    fn search_tool() -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web".to_string(),
            parameters: vec![ToolParameter::string("query", "The search query")],
            required: vec!["query".to_string()],
        }
    }

    #[test]
    fn test_request_payload_shape() {
        let call = ToolCall::new("web_search", json!({"query": "x"}).as_object().cloned().unwrap());
        let request = CompletionRequest::new(
            "gemma3:latest",
            vec![
                ChatMessage::system("sys"),
                ChatMessage::user("hi"),
                ChatMessage::assistant_with_tool_calls("", vec![call.clone()]),
                ChatMessage::tool_result(&call.id, "3 results"),
            ],
        )
        .with_tools(vec![search_tool()]);

        let body = serde_json::to_value(provider("http://x").build_api_request(&request, false)).unwrap();
        assert_eq!(body["model"], "gemma3:latest");
        assert_eq!(body["stream"], false);
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
        assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["arguments"]["query"], "x");
        assert_eq!(body["messages"][3]["role"], "tool");
        assert!(body["messages"][3].get("tool_call_id").is_none());
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let api: ApiResponse = serde_json::from_value(json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    { "function": { "name": "web_search", "arguments": { "query": "rust" } } }
                ]
            },
            "done": true
        }))
        .unwrap();
        let completion = OllamaProvider::parse_response(api).unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "web_search");
        assert_eq!(completion.tool_calls[0].args["query"], "rust");
        assert!(completion.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_bad_request_is_capability_rejection() {
        rt().block_on(async {
            let (base, server) = serve_once(
                "400 Bad Request",
                "application/json",
                r#"{"error":"registry.ollama.ai/library/gemma3 does not support tools"}"#,
            )
            .await;

            let request = CompletionRequest::new("gemma3", vec![ChatMessage::user("hi")])
                .with_tools(vec![search_tool()]);
            let err = provider(&base).complete_once(&request).await.unwrap_err();
            assert_eq!(err.status(), Some(400));
            assert!(err.is_capability_rejection());

            let raw = server.await.unwrap();
            assert!(raw.starts_with("POST /api/chat"));
            assert!(raw.contains("\"stream\":false"));
        });
    }

    #[test]
    fn test_streaming_over_http() {
        rt().block_on(async {
            let body = concat!(
                "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"\"},\"done\":true}\n",
            );
            let (base, _server) = serve_once("200 OK", "application/x-ndjson", body).await;

            let request = CompletionRequest::new("gemma3", vec![ChatMessage::user("hi")]);
            let chunks: Vec<StreamChunk> = provider(&base)
                .complete_streaming(&request)
                .await
                .unwrap()
                .collect()
                .await;
            assert_eq!(
                chunks,
                vec![
                    StreamChunk::text("Hel"),
                    StreamChunk::text("lo"),
                    StreamChunk::done()
                ]
            );
        });
    }

    #[test]
    fn test_connection_refused_is_connection_error() {
        rt().block_on(async {
            // Bind then drop to get a port nothing listens on.
            let port = {
                let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
                listener.local_addr().unwrap().port()
            };
            let request = CompletionRequest::new("gemma3", vec![ChatMessage::user("hi")]);
            let result = provider(&format!("http://127.0.0.1:{port}"))
                .complete_streaming(&request)
                .await;
            assert!(matches!(result, Err(LlmError::Connection { .. })));
        });
    }

    #[test]
    fn test_unanswered_request_times_out() {
        rt().block_on(async {
            let base = serve_stalled("").await;
            let request = CompletionRequest::new("gemma3", vec![ChatMessage::user("hi")]);
            let result = OllamaProvider::new(&base, Duration::from_secs(1))
                .complete_once(&request)
                .await;
            assert!(matches!(result, Err(LlmError::Timeout { secs: 1 })), "{result:?}");
        });
    }

    #[test]
    fn test_stalled_body_times_out() {
        rt().block_on(async {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 200\r\n\r\n{\"message\":";
            let base = serve_stalled(head).await;
            let request = CompletionRequest::new("gemma3", vec![ChatMessage::user("hi")]);
            let result = OllamaProvider::new(&base, Duration::from_secs(1))
                .complete_once(&request)
                .await;
            assert!(matches!(result, Err(LlmError::Timeout { secs: 1 })), "{result:?}");
        });
    }
}
