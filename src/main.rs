use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use expandai::chat::ChatService;
use expandai::config::{AgentProfile, AppConfig};
use expandai::llm::ProviderKind;
use expandai::orchestrator::TurnAccumulator;
use expandai::router::route_prompt;
use expandai::runtime::AgentRuntime;
use expandai::tools::create_default_registry;
use expandai::types::{ChatMessage, StreamEvent};

#[derive(Parser)]
#[command(name = "expandai", about = "Chat with a team of local LLM agents", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config file
    Init,

    /// Ask one agent a single question
    Ask {
        prompt: String,

        /// Agent id or name (routed by keywords when omitted)
        #[arg(short, long)]
        agent: Option<String>,

        /// Run the turn on the external agent runtime
        #[arg(long)]
        runtime: bool,
    },

    /// Interactive chat with one agent
    Chat {
        /// Agent id or name
        #[arg(short, long, default_value = "hana")]
        agent: String,
    },

    /// Ask every agent the same question at once
    Team { prompt: String },

    /// List the models a provider serves
    Models {
        /// Provider to query (ollama or litellm)
        #[arg(short, long, default_value = "ollama")]
        provider: ProviderKind,
    },

    /// Show which agent a prompt would be routed to
    Route { prompt: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "expandai=debug" } else { "expandai=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            let path = AppConfig::save_default()?;
            println!("[Config] Wrote default config: {}", path.display());
            Ok(())
        }
        Commands::Route { prompt } => {
            let route = route_prompt(&prompt);
            println!("{} ({})", route.agent_id, route.reasoning);
            Ok(())
        }
        Commands::Models { provider } => {
            let config = AppConfig::load()?;
            let providers = config.build_providers();
            let client = providers
                .get(provider)
                .with_context(|| format!("provider '{provider}' is not configured"))?;
            for model in client.list_models().await? {
                println!("{model}");
            }
            Ok(())
        }
        Commands::Ask { prompt, agent, runtime } => {
            let config = AppConfig::load()?;
            let agent = match agent {
                Some(key) => find_agent(&config, &key)?,
                None => {
                    let route = route_prompt(&prompt);
                    println!("[{}]", route.reasoning);
                    find_agent(&config, route.agent_id)?
                }
            };
            let chat = build_service(&config, runtime).await;
            let mut events = chat.send(&agent, &[], &prompt, runtime);
            print_turn(&agent, &mut events).await;
            Ok(())
        }
        Commands::Chat { agent } => {
            let config = AppConfig::load()?;
            let agent = find_agent(&config, &agent)?;
            let chat = build_service(&config, false).await;
            chat_loop(chat, agent).await
        }
        Commands::Team { prompt } => {
            let config = AppConfig::load()?;
            let chat = build_service(&config, false).await;
            team(&chat, &config.agents, &prompt).await;
            Ok(())
        }
    }
}

fn find_agent(config: &AppConfig, key: &str) -> Result<AgentProfile> {
    match config.agent(key) {
        Some(agent) => Ok(agent.clone()),
        None => bail!(
            "Unknown agent '{}'. Configured: {}",
            key,
            config
                .agents
                .iter()
                .map(|a| a.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Build the chat service; connects and syncs the agent runtime when asked
/// for or enabled in config. A runtime that is down is logged and skipped.
async fn build_service(config: &AppConfig, want_runtime: bool) -> ChatService {
    let chat = ChatService::new(
        config.build_providers(),
        Arc::new(create_default_registry()),
        config.language.clone(),
    );
    if !(want_runtime || config.runtime.enabled) {
        return chat;
    }
    let runtime = match AgentRuntime::connect(&config.runtime.base_url).await {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "continuing without agent runtime");
            return chat;
        }
    };
    println!("[Runtime] Connected to {}", runtime.base_url());
    let chat = chat.with_runtime(runtime);
    match chat.sync_agents(&config.agents, config).await {
        Ok(n) => println!("[Runtime] {n}/{} agents registered", config.agents.len()),
        Err(e) => warn!(error = %e, "agent sync failed"),
    }
    chat
}

/// Print a turn as it streams and return the assistant's text.
async fn print_turn<S>(agent: &AgentProfile, events: &mut S) -> String
where
    S: futures_util::Stream<Item = StreamEvent> + Unpin,
{
    let mut acc = TurnAccumulator::new();
    print!("\n{} > ", agent.name);
    let _ = std::io::stdout().flush();
    while let Some(event) = events.next().await {
        match &event {
            StreamEvent::ToolCall { tool_name, args, .. } => {
                println!("\n  [Tool: {tool_name} {}]", serde_json::Value::Object(args.clone()));
            }
            StreamEvent::ToolResult { tool_name, result, .. } => {
                println!("  [{tool_name}: {} chars]", result.chars().count());
            }
            StreamEvent::Chunk { content, .. } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
        }
        acc.observe(&event);
    }
    println!("\n");
    acc.finish().content
}

async fn chat_loop(mut chat: ChatService, agent: AgentProfile) -> Result<()> {
    println!("Chatting with {} ({}).", agent.name, agent.description);
    println!("Type your message. Type quit or exit to leave, /clear to reset.");

    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You > ");
        let _ = std::io::stdout().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input.to_lowercase().as_str() {
            "quit" | "exit" | "/quit" | "/exit" => {
                println!("Goodbye!");
                break;
            }
            "/clear" | "clear" => {
                history.clear();
                chat.reset_session();
                println!("[Cleared]");
                continue;
            }
            _ => {}
        }

        let mut events = chat.send(&agent, &history, input, chat.runtime().is_some());
        let reply = print_turn(&agent, &mut events).await;
        history.push(ChatMessage::user(input));
        history.push(ChatMessage::assistant(reply));
    }
    Ok(())
}

/// Broadcast a prompt and print each agent's full answer as it finishes.
async fn team(chat: &ChatService, agents: &[AgentProfile], prompt: &str) {
    let names: HashMap<&str, &str> = agents.iter().map(|a| (a.id.as_str(), a.name.as_str())).collect();
    let mut buffers: HashMap<String, String> = HashMap::new();
    let mut events = chat.broadcast(prompt, agents);
    while let Some(tagged) = events.next().await {
        let StreamEvent::Chunk { content, done } = tagged.event else {
            continue;
        };
        let buffer = buffers.entry(tagged.agent_id.clone()).or_default();
        buffer.push_str(&content);
        if done {
            let name = names.get(tagged.agent_id.as_str()).copied().unwrap_or("?");
            println!("── {name} ──\n{}\n", buffer.trim());
        }
    }
}
