//! Configuration management for expandai.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::llm::ollama::OllamaProvider;
use crate::llm::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::{ProviderKind, Providers};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Answer language code ("en", "ko", "ja", "zh", ...)
    #[serde(default = "default_language")]
    pub language: String,
    /// Ceiling for non-streaming provider requests
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentProfile>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub litellm: LiteLlmConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteLlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LiteLlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            api_key: None,
            api_key_env: default_api_key_env(),
        }
    }
}

/// External agent runtime (an HTTP service hosting its own agent loop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub base_url: String,
    /// Try to connect at startup
    #[serde(default)]
    pub enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7891".to_string(),
            enabled: false,
        }
    }
}

/// An agent persona: which model it runs on, how it is prompted and which
/// tools it may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_api_key_env() -> String {
    "LITELLM_API_KEY".to_string()
}

fn default_provider() -> ProviderKind {
    ProviderKind::Ollama
}

fn default_model() -> String {
    "gemma3:latest".to_string()
}

fn persona(id: &str, name: &str, description: &str, system_prompt: &str, tools: &[&str]) -> AgentProfile {
    AgentProfile {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        provider: default_provider(),
        model: default_model(),
        system_prompt: system_prompt.to_string(),
        tools: tools.iter().map(|t| t.to_string()).collect(),
    }
}

fn default_agents() -> Vec<AgentProfile> {
    vec![
        persona(
            "hana",
            "Hana",
            "General assistant",
            "You are Hana, a friendly and knowledgeable general assistant. \
             Answer clearly and concisely, and look things up when the question \
             depends on current information.",
            &["web_search"],
        ),
        persona(
            "ren",
            "Ren",
            "Planner",
            "You are Ren, a methodical planner. Break goals into concrete steps, \
             milestones and priorities, and keep plans realistic.",
            &[],
        ),
        persona(
            "yuki",
            "Yuki",
            "Designer",
            "You are Yuki, a UI/UX and visual designer. Give practical design \
             advice on layout, color, typography and accessibility.",
            &[],
        ),
        persona(
            "kira",
            "Kira",
            "Developer",
            "You are Kira, a pragmatic software engineer. Write correct, idiomatic \
             code, explain trade-offs briefly and point out bugs you notice.",
            &[],
        ),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            request_timeout_secs: default_request_timeout_secs(),
            providers: ProvidersConfig::default(),
            runtime: RuntimeConfig::default(),
            agents: default_agents(),
        }
    }
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".expandai").join("config.toml"))
    }

    /// Load the user's config file (defaults if it does not exist) and apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    /// Apply `EXPANDAI_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("EXPANDAI_OLLAMA_URL") {
            self.providers.ollama.base_url = url;
        }
        if let Some(url) = lookup("EXPANDAI_LITELLM_URL") {
            self.providers.litellm.base_url = url;
        }
        if let Some(language) = lookup("EXPANDAI_LANGUAGE") {
            self.language = language;
        }
    }

    /// LiteLLM credential: config value, then the configured env var, then
    /// `dummy` (proxies without auth accept any bearer token).
    pub fn litellm_api_key(&self) -> String {
        self.litellm_api_key_with(|key| std::env::var(key).ok())
    }

    fn litellm_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        let litellm = &self.providers.litellm;
        litellm
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| lookup(&litellm.api_key_env).filter(|k| !k.is_empty()))
            .unwrap_or_else(|| "dummy".to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL configured for a provider kind.
    pub fn provider_base_url(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Ollama => &self.providers.ollama.base_url,
            ProviderKind::OpenAiCompatible => &self.providers.litellm.base_url,
        }
    }

    /// Find an agent by id or (case-insensitive) name.
    pub fn agent(&self, key: &str) -> Option<&AgentProfile> {
        self.agents
            .iter()
            .find(|a| a.id == key || a.name.eq_ignore_ascii_case(key))
    }

    /// Build one shared client per provider kind.
    pub fn build_providers(&self) -> Providers {
        let timeout = self.request_timeout();
        Providers::new()
            .with(
                ProviderKind::Ollama,
                Arc::new(OllamaProvider::new(&self.providers.ollama.base_url, timeout)),
            )
            .with(
                ProviderKind::OpenAiCompatible,
                Arc::new(OpenAiCompatibleProvider::new(
                    &self.providers.litellm.base_url,
                    self.litellm_api_key(),
                    timeout,
                )),
            )
    }

    pub fn save_default() -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        Self::default().save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        AppConfig::default().save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, AppConfig::default());
        assert_eq!(loaded.agents.len(), 4);
        assert_eq!(loaded.agent("hana").unwrap().tools, vec!["web_search"]);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.request_timeout(), Duration::from_secs(120));
        assert_eq!(loaded.language, "en");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
language = "ko"

[providers.litellm]
base_url = "http://proxy:4000"

[[agents]]
id = "scout"
name = "Scout"
provider = "litellm"
model = "gpt-4o-mini"
tools = ["web_search"]
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.language, "ko");
        assert_eq!(config.providers.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.providers.litellm.api_key_env, "LITELLM_API_KEY");
        assert_eq!(config.agents.len(), 1);

        let scout = config.agent("SCOUT").unwrap();
        assert_eq!(scout.provider, ProviderKind::OpenAiCompatible);
        assert_eq!(config.provider_base_url(scout.provider), "http://proxy:4000");
        assert!(scout.system_prompt.is_empty());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "language = [").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            "EXPANDAI_OLLAMA_URL" => Some("http://gpu-box:11434".to_string()),
            "EXPANDAI_LANGUAGE" => Some("ja".to_string()),
            _ => None,
        });
        assert_eq!(config.providers.ollama.base_url, "http://gpu-box:11434");
        assert_eq!(config.providers.litellm.base_url, "http://localhost:4000");
        assert_eq!(config.language, "ja");
    }

    #[test]
    fn test_litellm_api_key_precedence() {
        let mut config = AppConfig::default();
        let env = |key: &str| (key == "LITELLM_API_KEY").then(|| "from-env".to_string());

        assert_eq!(config.litellm_api_key_with(|_| None), "dummy");
        assert_eq!(config.litellm_api_key_with(env), "from-env");

        config.providers.litellm.api_key = Some("from-config".to_string());
        assert_eq!(config.litellm_api_key_with(env), "from-config");

        config.providers.litellm.api_key = Some(String::new());
        assert_eq!(config.litellm_api_key_with(|_| None), "dummy");
    }

    #[test]
    fn test_build_providers_covers_every_kind() {
        let providers = AppConfig::default().build_providers();
        assert_eq!(providers.get(ProviderKind::Ollama).unwrap().name(), "Ollama");
        assert_eq!(
            providers.get(ProviderKind::OpenAiCompatible).unwrap().name(),
            "OpenAI-Compatible"
        );
    }
}
