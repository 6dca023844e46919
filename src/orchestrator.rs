//! Turn orchestration.
//!
//! A turn is one user message through to one finished answer. The
//! orchestrator picks the path (plain streaming when no enabled tool
//! resolves, the native tool driver otherwise), relays the driver's events
//! and guarantees the sequence ends with exactly one terminal chunk. A
//! transport failure anywhere in the turn becomes that terminal chunk with
//! `Error: <message>` as its content; nothing is thrown past `send_turn`.
//!
//! The orchestrator holds no per-turn state, so concurrent turns are just
//! independent streams.

use std::sync::Arc;

use async_stream::{stream, try_stream};
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::drivers::{native, EventStream, ToolTurn};
use crate::llm::{stream_completion, LlmProvider};
use crate::tools::ToolRegistry;
use crate::types::{ChatMessage, StreamEvent, ToolArgs, ToolCallRecord};

/// Input of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub turn_id: String,
    pub model: String,
    /// Conversation so far, ending with the new user message
    pub history: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    /// Tool names enabled for the agent; unknown names are ignored
    pub enabled_tools: Vec<String>,
}

impl TurnRequest {
    pub fn new(model: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            model: model.into(),
            history,
            system_prompt: None,
            enabled_tools: vec![],
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_tools(mut self, enabled_tools: Vec<String>) -> Self {
        self.enabled_tools = enabled_tools;
        self
    }
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Start a turn and return its event stream.
    ///
    /// The stream always ends with exactly one `Chunk { done: true }`.
    pub fn send_turn(
        &self,
        provider: Arc<dyn LlmProvider>,
        request: TurnRequest,
    ) -> BoxStream<'static, StreamEvent> {
        let tools = self.registry.definitions(&request.enabled_tools);
        let turn_id = request.turn_id.clone();

        let mut events: EventStream = if tools.is_empty() {
            debug!(turn_id = %turn_id, provider = provider.name(), "no tools enabled, streaming directly");
            stream_direct(provider, request)
        } else {
            info!(
                turn_id = %turn_id,
                provider = provider.name(),
                tools = tools.len(),
                "tools enabled, using native tool calling"
            );
            native::run(ToolTurn {
                provider,
                registry: Arc::clone(&self.registry),
                model: request.model,
                history: request.history,
                system_prompt: request.system_prompt,
                tools,
            })
        };

        Box::pin(stream! {
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(turn_id = %turn_id, error = %err, "turn failed");
                        yield StreamEvent::terminal_with(format!("Error: {err}"));
                        return;
                    }
                }
            }
            // Drivers always finish with a terminal chunk; this covers a
            // provider stream that stopped without one.
            yield StreamEvent::terminal();
        })
    }

    /// Drain a turn, calling `on_event` for every event, and return what it
    /// produced.
    pub async fn run_turn<F>(
        &self,
        provider: Arc<dyn LlmProvider>,
        request: TurnRequest,
        mut on_event: F,
    ) -> TurnOutcome
    where
        F: FnMut(&StreamEvent),
    {
        let mut accumulator = TurnAccumulator::new();
        let mut events = self.send_turn(provider, request);
        while let Some(event) = events.next().await {
            on_event(&event);
            accumulator.observe(&event);
        }
        accumulator.finish()
    }
}

fn stream_direct(provider: Arc<dyn LlmProvider>, request: TurnRequest) -> EventStream {
    Box::pin(try_stream! {
        let mut chunks = stream_completion(
            provider.as_ref(),
            &request.model,
            &request.history,
            request.system_prompt.as_deref(),
        )
        .await?;
        while let Some(chunk) = chunks.next().await {
            yield StreamEvent::from(chunk);
        }
    })
}

// --- Accumulation ---

/// What a finished turn leaves behind for persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// All chunk text in arrival order, error text included
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TurnOutcome {
    /// Metadata stored next to the assistant message.
    pub fn metadata(&self) -> Value {
        if self.tool_calls.is_empty() {
            json!({})
        } else {
            json!({ "tool_calls": self.tool_calls })
        }
    }
}

struct PendingCall {
    call_id: String,
    tool_name: String,
    args: ToolArgs,
}

/// Builds a [`TurnOutcome`] from a turn's events.
pub struct TurnAccumulator {
    content: String,
    pending: Vec<PendingCall>,
    tool_calls: Vec<ToolCallRecord>,
    started_at: DateTime<Utc>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            pending: Vec::new(),
            tool_calls: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Chunk { content, .. } => {
                if !content.is_empty() {
                    self.content.push_str(content);
                }
            }
            StreamEvent::ToolCall {
                call_id,
                tool_name,
                args,
            } => self.pending.push(PendingCall {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
            }),
            StreamEvent::ToolResult {
                call_id, result, ..
            } => match self.pending.iter().position(|p| &p.call_id == call_id) {
                Some(index) => {
                    let call = self.pending.remove(index);
                    self.tool_calls.push(ToolCallRecord {
                        tool_name: call.tool_name,
                        args: call.args,
                        result: result.clone(),
                    });
                }
                None => warn!(call_id = %call_id, "tool result without a matching call"),
            },
        }
    }

    pub fn finish(self) -> TurnOutcome {
        TurnOutcome {
            content: self.content,
            tool_calls: self.tool_calls,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Default for TurnAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
