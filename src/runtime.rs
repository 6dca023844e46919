//! Client for an external agent runtime.
//!
//! The runtime is a separate HTTP service that hosts its own agent loop.
//! A handle only exists after a successful health check, so holding an
//! `AgentRuntime` is the proof that the service answered; callers that may
//! run without it take an `Option<AgentRuntime>`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::types::ChatMessage;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const RUN_TIMEOUT: Duration = Duration::from_secs(120);

/// Agent description pushed to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeAgent {
    pub id: String,
    pub name: String,
    pub model: String,
    pub provider: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeHealth {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    session_id: &'a str,
    message: &'a str,
    history: Vec<HistoryEntry<'a>>,
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct RunResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    ok: bool,
}

/// Handle to a healthy agent runtime.
#[derive(Debug, Clone)]
pub struct AgentRuntime {
    base_url: String,
    client: reqwest::Client,
}

impl AgentRuntime {
    /// Health-check the runtime at `base_url` and return a handle to it.
    pub async fn connect(base_url: impl Into<String>) -> Result<Self> {
        let runtime = Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        };
        let health = runtime
            .health()
            .await
            .with_context(|| format!("Agent runtime at {} is not reachable", runtime.base_url))?;
        info!(
            base_url = %runtime.base_url,
            version = health.version.as_deref().unwrap_or("unknown"),
            "agent runtime connected"
        );
        Ok(runtime)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<RuntimeHealth> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        // A bare 200 with a non-JSON body still counts as healthy.
        Ok(serde_json::from_str(&body).unwrap_or(RuntimeHealth { version: None }))
    }

    pub async fn register_agent(&self, agent: &RuntimeAgent) -> Result<()> {
        debug!(agent = %agent.id, "registering agent with runtime");
        let response = self
            .client
            .post(format!("{}/agents", self.base_url))
            .json(agent)
            .timeout(REGISTER_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to register agent '{}'", agent.id))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("Agent runtime rejected '{}': {}", agent.id, error_message(status, &body));
        }
        let parsed: RegisterResponse = serde_json::from_str(&body).unwrap_or(RegisterResponse { ok: false });
        if !parsed.ok {
            bail!("Agent runtime did not accept '{}'", agent.id);
        }
        Ok(())
    }

    /// Run one message through a registered agent and return its answer.
    ///
    /// `history` is the conversation before `message`.
    pub async fn run(
        &self,
        agent_id: &str,
        session_id: &str,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<String> {
        let body = RunRequest {
            session_id,
            message,
            history: history
                .iter()
                .map(|m| HistoryEntry {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };
        let response = self
            .client
            .post(format!("{}/agents/{}/run", self.base_url, agent_id))
            .json(&body)
            .timeout(RUN_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach agent runtime at {}", self.base_url))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("{}", error_message(status, &text));
        }
        let parsed: RunResponse =
            serde_json::from_str(&text).context("Agent runtime returned an invalid response")?;
        match parsed.content {
            Some(content) if !content.is_empty() => Ok(content),
            _ => bail!("Agent runtime run failed: no content returned"),
        }
    }
}

/// The runtime's own `error` field when it sent one, else the HTTP status.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {status}"))
}
