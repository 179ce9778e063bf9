//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use opsdeck_config::ConfigError;
use opsdeck_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    /// Matches `EX_CONFIG` from sysexits.h.
    pub const CONFIG: i32 = 78;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration is invalid")]
    #[diagnostic(
        code(opsdeck::config),
        help(
            "Config file: {path}\n\
             Secrets can be set inline or via *_env fields, and any key can be\n\
             overridden with OPSDECK_<SECTION>__<KEY> environment variables."
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Server ───────────────────────────────────────────────────────
    #[error("Could not bind {addr}")]
    #[diagnostic(
        code(opsdeck::bind_failed),
        help("Is another process listening there? Try --bind 127.0.0.1:0")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Agent link ───────────────────────────────────────────────────
    #[error("Agent link closed")]
    #[diagnostic(
        code(opsdeck::link_closed),
        help(
            "The server rejected the agent key or is unreachable.\n\
             Check --key / OPSDECK_AGENT_KEY and the --server URL."
        )
    )]
    LinkClosed,

    // ── Domain ───────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(opsdeck::core))]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    #[diagnostic(code(opsdeck::io))]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config(path: impl Into<String>, source: ConfigError) -> Self {
        Self::Config {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::CONFIG,
            Self::Bind { .. } | Self::LinkClosed => exit_code::CONNECTION,
            Self::Core(e) if e.is_auth_expired() => exit_code::AUTH,
            Self::Core(CoreError::ConnectionFailed { .. }) => exit_code::CONNECTION,
            Self::Core(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}
