//! Command-line definitions.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "opsdeck",
    version,
    about = "Real-time device telemetry, discovery and chat server",
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file [default: platform config dir]
    #[arg(long, short = 'c', global = true, env = "OPSDECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP and WebSocket server
    Serve(ServeArgs),

    /// Run a discovery agent that forwards JSON lines from stdin
    Agent(AgentArgs),

    /// Mint an identity token for local testing
    Token(TokenArgs),

    /// Validate the configuration and print it with secrets masked
    CheckConfig,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to bind, overriding [server].bind
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Debug, Args)]
pub struct AgentArgs {
    /// Agent endpoint, e.g. ws://127.0.0.1:8000/api/discovery/ws/agent
    #[arg(long)]
    pub server: Url,

    /// Agent key, overriding [auth].agent_key
    #[arg(long, env = "OPSDECK_AGENT_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

#[derive(Debug, Args)]
pub struct TokenArgs {
    #[arg(long)]
    pub user_id: u64,

    #[arg(long)]
    pub username: String,

    /// Token lifetime, e.g. "1h" or "30m"
    #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
    pub ttl: Duration,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    pub shell: Shell,
}
