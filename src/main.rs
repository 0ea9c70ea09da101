//! mcp-chat command-line entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{ArgGroup, CommandFactory, Parser};
use tokio::io::BufReader;

use mcp_chat::agent_core::{ChatSession, SessionError, DEFAULT_MAX_ROUNDS};
use mcp_chat::inference::{LlmProvider, ProviderConfig, ProviderKind, QueryHandler};
use mcp_chat::mcp_client::config::{find_config_path, from_script_path, CONFIG_ENV_VAR};
use mcp_chat::mcp_client::{McpClient, ServerConfigs, ServerDescriptor};

#[derive(Parser, Debug)]
#[command(name = "mcp-chat", version)]
#[command(about = "A minimal MCP client with OpenAI and Ollama support")]
#[command(long_about = "Connects an LLM to one MCP tool server, started either as a local \
script or inside a container, and talks to it over stdio.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    OpenAI API key (selects OpenAI when --provider is not given)\n\
  OPENAI_BASE_URL   Custom API base URL (default https://api.openai.com/v1)\n\
  OPENAI_MODEL      Default OpenAI model (default gpt-4o-mini)\n\
  OLLAMA_BASE_URL   Ollama server (default http://localhost:11434)\n\
  OLLAMA_MODEL      Default Ollama model (default qwen2.5:7b)\n\
  MCP_CHAT_CONFIG   Path to the server definition file\n\
  RUST_LOG          Log filter for the log file")]
#[command(group(
    ArgGroup::new("target")
        .args(["server_path", "server", "list_servers"])
        .required(true)
))]
#[command(group(ArgGroup::new("action").args(["members", "chat"])))]
struct Cli {
    /// Path to the MCP server script (legacy mode)
    server_path: Option<PathBuf>,

    /// Name of a configured MCP server
    #[arg(short, long, value_name = "NAME")]
    server: Option<String>,

    /// List all configured MCP servers and exit
    #[arg(long)]
    list_servers: bool,

    /// List the server's tools, prompts, and resources
    #[arg(long)]
    members: bool,

    /// Start an AI-powered chat with the server's tools
    #[arg(long)]
    chat: bool,

    /// LLM provider (auto-detected if not specified)
    #[arg(long, value_parser = parse_provider)]
    provider: Option<ProviderKind>,

    /// Model name. OpenAI: gpt-4o-mini (default), gpt-4o, ... Ollama: qwen2.5:7b (default), llama3.2:3b, ...
    #[arg(long)]
    model: Option<String>,

    /// Server definition file (JSON or YAML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Maximum tool rounds per user message
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_ROUNDS)]
    max_rounds: usize,

    /// Debug-level logging to the log file
    #[arg(short, long)]
    verbose: bool,
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.list_servers && !cli.members && !cli.chat {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "one of --members or --chat is required (unless using --list-servers)",
            )
            .exit();
    }

    if let Err(e) = mcp_chat::init_tracing(cli.verbose) {
        eprintln!("Warning: file logging disabled: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "exiting with error");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit status carried by the first session error in the chain, else 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<SessionError>())
        .map(SessionError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;

    if cli.list_servers {
        let configs = load_configs(cli.config.as_deref(), &cwd)?;
        print!("{}", configs.servers_table());
        return Ok(());
    }

    let descriptor = resolve_descriptor(&cli, &cwd)?;

    // Resolve the provider before spawning anything so a missing key fails fast.
    let provider = if cli.chat {
        let env = |key: &str| std::env::var(key).ok();
        let config = ProviderConfig::resolve(cli.provider, cli.model.as_deref(), &env)
            .map_err(SessionError::from)?;
        let provider = LlmProvider::from_config(config).map_err(SessionError::from)?;
        provider.preflight().await;
        println!("Using {} model: {}", provider.provider(), provider.model());
        Some(provider)
    } else {
        None
    };

    let mut client = McpClient::connect(&descriptor)
        .await
        .map_err(SessionError::from)
        .with_context(|| format!("could not start server '{}'", descriptor.name))?;

    let Some(provider) = provider else {
        print!("{}", client.members_report());
        client.close().await;
        return Ok(());
    };

    if let Some(instructions) = client.instructions() {
        tracing::info!(server = %descriptor.name, instructions, "server instructions");
    }

    let mut session = ChatSession::new(provider, client).with_max_rounds(cli.max_rounds);
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    let outcome = tokio::select! {
        res = session.run_chat(stdin, stdout) => res,
        _ = tokio::signal::ctrl_c() => {
            println!("\n\nInterrupted by user");
            Ok(())
        }
    };
    session.terminate().await;
    Ok(outcome?)
}

fn load_configs(explicit: Option<&Path>, cwd: &Path) -> anyhow::Result<ServerConfigs> {
    let path = find_config_path(explicit, std::env::var(CONFIG_ENV_VAR).ok(), cwd)
        .map_err(SessionError::from)?;
    let configs = ServerConfigs::load(&path)
        .map_err(SessionError::from)
        .with_context(|| format!("error loading server configuration from {}", path.display()))?;
    Ok(configs)
}

fn resolve_descriptor(cli: &Cli, cwd: &Path) -> anyhow::Result<ServerDescriptor> {
    if let Some(name) = &cli.server {
        let configs = load_configs(cli.config.as_deref(), cwd)?;
        let descriptor = configs
            .get(name)
            .map_err(SessionError::from)
            .context("use --list-servers to see available servers")?
            .clone();
        println!("Using configured server: {name}");
        if !descriptor.description.is_empty() {
            println!("Description: {}", descriptor.description);
        }
        return Ok(descriptor);
    }

    let path = cli
        .server_path
        .as_deref()
        .ok_or_else(|| anyhow!("either SERVER_PATH or --server must be specified"))?;
    Ok(from_script_path(path).map_err(SessionError::from)?)
}
