mod agent;
mod cli;
mod error;

use std::path::Path;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use opsdeck_config::Config;
use opsdeck_core::auth::JwtVerifier;
use opsdeck_core::{Hub, Identity, MemoryStore};

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout belongs to command output (tokens, agent commands).
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "opsdeck", &mut std::io::stdout());
            Ok(())
        }

        Command::CheckConfig => {
            let (cfg, path) = load(cli.global.config.as_deref())?;
            cfg.to_hub_config()
                .and_then(|_| cfg.seed_targets())
                .map_err(|e| CliError::config(&path, e))?;
            let rendered = cfg
                .to_redacted_toml()
                .map_err(|e| CliError::config(&path, e))?;
            println!("# configuration OK ({path})\n{rendered}");
            Ok(())
        }

        Command::Token(args) => {
            let (cfg, path) = load(cli.global.config.as_deref())?;
            let secret = cfg.jwt_secret().map_err(|e| CliError::config(&path, e))?;
            let identity = Identity {
                user_id: args.user_id,
                username: args.username,
            };
            let token = JwtVerifier::new(&secret).issue(&identity, args.ttl)?;
            println!("{token}");
            Ok(())
        }

        Command::Agent(args) => {
            let key = match args.key {
                Some(key) => SecretString::from(key),
                None => {
                    let (cfg, path) = load(cli.global.config.as_deref())?;
                    cfg.agent_key().map_err(|e| CliError::config(&path, e))?
                }
            };
            agent::run(args.server, key).await
        }

        Command::Serve(args) => {
            let (cfg, path) = load(cli.global.config.as_deref())?;
            let hub_config = cfg.to_hub_config().map_err(|e| CliError::config(&path, e))?;
            let targets = cfg.seed_targets().map_err(|e| CliError::config(&path, e))?;
            info!(targets = targets.len(), "seeding target store");

            let bind = args.bind.unwrap_or(cfg.server.bind);
            let listener = TcpListener::bind(bind).await.map_err(|source| CliError::Bind {
                addr: bind.to_string(),
                source,
            })?;

            let hub = Hub::new(hub_config, Arc::new(MemoryStore::with_targets(targets)));
            opsdeck::server::serve(listener, hub, &cfg.server.cors_origins, shutdown_signal())
                .await?;
            Ok(())
        }
    }
}

/// Load config from `--config` or the default location.
fn load(explicit: Option<&Path>) -> Result<(Config, String), CliError> {
    let path = explicit.map_or_else(opsdeck_config::config_path, Path::to_path_buf);
    let display = path.display().to_string();
    let cfg = opsdeck_config::load_config(explicit).map_err(|e| CliError::config(&display, e))?;
    Ok((cfg, display))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C; shutting down");
    }
}
