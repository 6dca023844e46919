//! Caller-side chat glue.
//!
//! Turns an agent profile plus a conversation into a turn: the language
//! directive is applied to the agent's system prompt, the provider is
//! selected by the agent's `ProviderKind`, and the turn goes either to the
//! external agent runtime (when asked for and connected) or through the
//! orchestrator.

use std::sync::Arc;

use anyhow::Result;
use async_stream::stream;
use futures_util::future::join_all;
use futures_util::stream::{self, select_all, BoxStream};
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::config::{AgentProfile, AppConfig};
use crate::llm::{LlmProvider, Providers};
use crate::orchestrator::{Orchestrator, TurnRequest};
use crate::runtime::{AgentRuntime, RuntimeAgent};
use crate::tools::ToolRegistry;
use crate::types::{ChatMessage, StreamEvent, TaggedEvent};

/// Display name for a language code; unknown codes are used as given.
pub fn language_name(code: &str) -> &str {
    match code {
        "ko" => "Korean (한국어)",
        "ja" => "Japanese (日本語)",
        "zh" => "Chinese (中文)",
        "en" => "English",
        other => other,
    }
}

/// Prefix `system_prompt` with an instruction to answer in `lang`.
///
/// English (or no language) leaves the prompt untouched.
pub fn with_language(system_prompt: &str, lang: &str) -> String {
    if lang.is_empty() || lang == "en" {
        return system_prompt.to_string();
    }
    let instruction = format!(
        "IMPORTANT: You must always respond in {}. Do not switch languages even if the user writes in another language.",
        language_name(lang)
    );
    if system_prompt.is_empty() {
        instruction
    } else {
        format!("{instruction}\n\n{system_prompt}")
    }
}

pub struct ChatService {
    providers: Providers,
    orchestrator: Orchestrator,
    runtime: Option<AgentRuntime>,
    language: String,
    session_id: String,
}

impl ChatService {
    pub fn new(providers: Providers, registry: Arc<ToolRegistry>, language: impl Into<String>) -> Self {
        Self {
            providers,
            orchestrator: Orchestrator::new(registry),
            runtime: None,
            language: language.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_runtime(mut self, runtime: AgentRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn runtime(&self) -> Option<&AgentRuntime> {
        self.runtime.as_ref()
    }

    /// Conversation id sent to the agent runtime.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Start a new conversation with the runtime.
    pub fn reset_session(&mut self) {
        self.session_id = uuid::Uuid::new_v4().to_string();
    }

    fn provider_for(&self, agent: &AgentProfile) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(agent.provider)
    }

    fn system_prompt(&self, agent: &AgentProfile) -> String {
        with_language(&agent.system_prompt, &self.language)
    }

    /// Send `message` to `agent`, with `history` as the conversation before it.
    ///
    /// The returned stream ends with exactly one terminal chunk.
    pub fn send(
        &self,
        agent: &AgentProfile,
        history: &[ChatMessage],
        message: &str,
        use_runtime: bool,
    ) -> BoxStream<'static, StreamEvent> {
        if use_runtime {
            match &self.runtime {
                Some(runtime) => return self.send_via_runtime(runtime.clone(), agent, history, message),
                None => debug!(agent = %agent.id, "agent runtime not connected, using orchestrator"),
            }
        }

        let Some(provider) = self.provider_for(agent) else {
            return error_stream(format!("provider '{}' is not configured", agent.provider));
        };

        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(message));
        let request = TurnRequest::new(&agent.model, messages)
            .with_system_prompt(self.system_prompt(agent))
            .with_tools(agent.tools.clone());
        self.orchestrator.send_turn(provider, request)
    }

    fn send_via_runtime(
        &self,
        runtime: AgentRuntime,
        agent: &AgentProfile,
        history: &[ChatMessage],
        message: &str,
    ) -> BoxStream<'static, StreamEvent> {
        let agent_id = agent.id.clone();
        let session_id = self.session_id.clone();
        let history = history.to_vec();
        let message = message.to_string();
        Box::pin(stream! {
            match runtime.run(&agent_id, &session_id, &message, &history).await {
                Ok(content) => yield StreamEvent::terminal_with(content),
                Err(err) => {
                    warn!(agent = %agent_id, error = %err, "agent runtime run failed");
                    yield StreamEvent::terminal_with(format!("Error: {err}"));
                }
            }
        })
    }

    /// Ask every agent in `agents` the same prompt at once.
    ///
    /// Plain streaming only (no tools). Events from different agents are
    /// interleaved in arrival order; each agent's own events stay ordered.
    pub fn broadcast(&self, prompt: &str, agents: &[AgentProfile]) -> BoxStream<'static, TaggedEvent> {
        let streams = agents.iter().map(|agent| {
            let request = TurnRequest::new(&agent.model, vec![ChatMessage::user(prompt)])
                .with_system_prompt(self.system_prompt(agent));
            let turn_id = request.turn_id.clone();
            let agent_id = agent.id.clone();

            let events = match self.provider_for(agent) {
                Some(provider) => self.orchestrator.send_turn(provider, request),
                None => error_stream(format!("provider '{}' is not configured", agent.provider)),
            };
            events
                .map(move |event| TaggedEvent {
                    turn_id: turn_id.clone(),
                    agent_id: agent_id.clone(),
                    event,
                })
                .boxed()
        });
        select_all(streams).boxed()
    }

    /// Register `agents` with the connected runtime. Returns how many were
    /// accepted.
    pub async fn sync_agents(&self, agents: &[AgentProfile], config: &AppConfig) -> Result<usize> {
        let Some(runtime) = &self.runtime else {
            anyhow::bail!("Agent runtime is not connected");
        };
        let api_key = config.litellm_api_key();
        let registrations = agents.iter().map(|agent| {
            let payload = RuntimeAgent {
                id: agent.id.clone(),
                name: agent.name.clone(),
                model: agent.model.clone(),
                provider: agent.provider.to_string(),
                system_prompt: agent.system_prompt.clone(),
                tools: agent.tools.clone(),
                base_url: config.provider_base_url(agent.provider).to_string(),
                api_key: api_key.clone(),
            };
            async move {
                let result = runtime.register_agent(&payload).await;
                if let Err(e) = &result {
                    warn!(agent = %payload.id, error = %e, "agent registration failed");
                }
                result.is_ok()
            }
        });
        let accepted = join_all(registrations).await.into_iter().filter(|ok| *ok).count();
        Ok(accepted)
    }
}

fn error_stream(message: String) -> BoxStream<'static, StreamEvent> {
    stream::once(async move { StreamEvent::terminal_with(format!("Error: {message}")) }).boxed()
}
