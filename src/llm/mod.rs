//! LLM Client module.
//!
//! This module defines the `LlmProvider` trait that abstracts over the
//! supported provider wire formats, and the concrete implementations:
//!
//! - **Ollama**: `/api/chat`, newline-delimited JSON streaming
//! - **OpenAI-compatible** (LiteLLM proxy): `/v1/chat/completions`, SSE
//!
//! The provider boundary is two operations. `complete_once` issues a
//! bounded, non-streaming request (the tool-call rounds use it), and
//! `complete_streaming` opens a fresh connection and yields the answer
//! incrementally.

pub mod framing;
pub mod ollama;
pub mod openai_compatible;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmError;
use crate::types::{ChatMessage, Completion, StreamChunk, ToolArgs, ToolDefinition};

/// Finite, non-restartable sequence of streamed fragments. Always ends with
/// exactly one `done` chunk.
pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// A provider-agnostic completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    /// Full message list, system prompt included
    pub messages: Vec<ChatMessage>,
    /// Tool schemas to offer; empty means a plain completion
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: vec![],
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a request and wait for the whole response. Bounded by the
    /// provider's request timeout.
    async fn complete_once(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;

    /// Open a streaming completion. Errors here mean the stream never
    /// started; once it has, failures end it with an implicit `done`.
    async fn complete_streaming(&self, request: &CompletionRequest)
        -> Result<ChunkStream, LlmError>;

    /// Models the endpoint currently serves.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    /// Return the provider's display name (for logging).
    fn name(&self) -> &str;
}

/// Prefix `history` with a system message when a prompt is supplied.
pub fn with_system_prompt(system_prompt: Option<&str>, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
        messages.push(ChatMessage::system(prompt));
    }
    messages.extend_from_slice(history);
    messages
}

/// Stream a plain completion (no tools) for `history`.
pub async fn stream_completion(
    provider: &dyn LlmProvider,
    model: &str,
    history: &[ChatMessage],
    system_prompt: Option<&str>,
) -> Result<ChunkStream, LlmError> {
    let request = CompletionRequest::new(model, with_system_prompt(system_prompt, history));
    provider.complete_streaming(&request).await
}

/// Normalize a tool call's `arguments` field into a JSON object.
///
/// Ollama sends an object; OpenAI-compatible endpoints send a JSON-encoded
/// string.
pub(crate) fn arguments_object(tool_name: &str, raw: Value) -> Result<ToolArgs, LlmError> {
    match raw {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ToolArgs::new()),
        Value::String(s) if s.trim().is_empty() => Ok(ToolArgs::new()),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(LlmError::Decode {
                reason: format!("arguments for '{tool_name}' are not an object: {other}"),
            }),
            Err(e) => Err(LlmError::Decode {
                reason: format!("invalid JSON arguments for '{tool_name}': {e}"),
            }),
        },
        other => Err(LlmError::Decode {
            reason: format!("arguments for '{tool_name}' are not an object: {other}"),
        }),
    }
}

// --- Provider selection ---

/// The closed set of supported provider wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "litellm", alias = "openai", alias = "openai_compatible")]
    OpenAiCompatible,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Ollama => f.write_str("ollama"),
            ProviderKind::OpenAiCompatible => f.write_str("litellm"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "litellm" | "openai" | "openai_compatible" => Ok(ProviderKind::OpenAiCompatible),
            other => anyhow::bail!(
                "Unknown provider: '{}'. Supported: 'ollama', 'litellm'",
                other
            ),
        }
    }
}

/// Lookup table from provider kind to a shared client.
#[derive(Clone, Default)]
pub struct Providers {
    by_kind: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ProviderKind, provider: Arc<dyn LlmProvider>) -> Self {
        self.by_kind.insert(kind, provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn LlmProvider>> {
        self.by_kind.get(&kind).cloned()
    }
}
