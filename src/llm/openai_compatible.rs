//! OpenAI-compatible LLM provider implementation (LiteLLM proxy and friends).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::framing::{decode_stream, Framing};
use super::{arguments_object, ChunkStream, CompletionRequest, LlmProvider};
use crate::error::{ensure_success, LlmError};
use crate::types::{Completion, Role, ToolCall};

const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OpenAiCompatibleProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

// --- API Request Types (OpenAI format) ---

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
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiToolCallFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ApiToolCallFunction {
    name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    arguments: Value,
}

// --- API Response Types ---

#[derive(Deserialize, Debug)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize, Debug)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ApiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize, Debug)]
struct ModelEntry {
    id: String,
}

// --- Implementation ---

impl OpenAiCompatibleProvider {
    /// An empty key is sent as `dummy`; LiteLLM proxies without auth still
    /// expect the header to be present.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, request_timeout: Duration) -> Self {
        let api_key = api_key.into();
        Self {
            api_key: if api_key.is_empty() { "dummy".to_string() } else { api_key },
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
            .map(|msg| match msg.role {
                Role::Assistant if !msg.tool_calls.is_empty() => ApiMessage {
                    role: "assistant",
                    content: if msg.content.is_empty() { None } else { Some(msg.content.clone()) },
                    tool_calls: Some(
                        msg.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".to_string(),
                                function: ApiToolCallFunction {
                                    name: tc.name.clone(),
                                    arguments: Value::String(Value::Object(tc.args.clone()).to_string()),
                                },
                            })
                            .collect(),
                    ),
                    tool_call_id: None,
                },
                Role::Tool => ApiMessage {
                    role: "tool",
                    content: Some(msg.content.clone()),
                    tool_calls: None,
                    tool_call_id: msg.tool_call_id.clone(),
                },
                role => ApiMessage {
                    role: role.as_str(),
                    content: Some(msg.content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
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
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode {
                reason: "empty response from API: no choices returned".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let args = arguments_object(&tc.function.name, tc.function.arguments)?;
                Ok(ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    args,
                })
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    async fn post_completions(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = self.endpoint("/v1/chat/completions");
        let body = self.build_api_request(request, stream);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream,
            "chat completions request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);
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
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete_once(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let response = self.post_completions(request, false).await?;
        let api_response: ApiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    secs: self.request_timeout.as_secs(),
                }
            } else {
                LlmError::Decode {
                    reason: format!("failed to parse API response: {e}"),
                }
            }
        })?;
        Self::parse_response(api_response)
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, LlmError> {
        let response = self.post_completions(request, true).await?;
        Ok(decode_stream(response.bytes_stream(), Framing::Sse))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = self.endpoint("/v1/models");
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await
            .map_err(|e| LlmError::from_send(&url, LIST_MODELS_TIMEOUT.as_secs(), e))?;
        let models: ModelsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::Decode {
                reason: e.to_string(),
            })?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    fn name(&self) -> &str {
        "OpenAI-Compatible"
    }
}
