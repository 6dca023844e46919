//! Tool-call drivers.
//!
//! A driver runs one tool round for a turn and then streams the final
//! answer. Two flavours exist:
//!
//! - [`native`]: tool schemas go to the provider as structured data and the
//!   provider answers with structured tool calls
//! - [`react`]: the tools are described in the system prompt and the model
//!   asks for one with an `ACTION:` / `INPUT:` text reply
//!
//! Both produce the same event shape, so callers cannot tell which one ran.

pub mod native;
pub mod react;

use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::error::LlmError;
use crate::llm::LlmProvider;
use crate::tools::ToolRegistry;
use crate::types::{ChatMessage, StreamEvent, ToolDefinition};

/// Events of one driver run. An `Err` is fatal for the turn.
pub type EventStream = BoxStream<'static, Result<StreamEvent, LlmError>>;

/// Everything a driver needs for one turn.
///
/// Owned so the driver's stream is `'static`; `history` is the caller's
/// conversation and is only ever copied, never appended to in place.
#[derive(Clone)]
pub struct ToolTurn {
    pub provider: Arc<dyn LlmProvider>,
    pub registry: Arc<ToolRegistry>,
    pub model: String,
    pub history: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    /// Resolved definitions of the enabled tools, in enabled order
    pub tools: Vec<ToolDefinition>,
}
