//! Configuration for the opsdeck server and tools.
//!
//! A TOML file merged with `OPSDECK_` environment variables, secret
//! resolution (env indirection + plaintext), and translation to
//! `opsdeck_core::HubConfig` plus the seed targets for the in-memory store.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use opsdeck_api::{ProtocolKind, TlsMode, TransportConfig};
use opsdeck_core::{HubConfig, Target, TargetId};

/// Prefix of environment overrides; nested keys are joined with `__`,
/// e.g. `OPSDECK_SERVER__BIND`.
pub const ENV_PREFIX: &str = "OPSDECK_";

const REDACTED: &str = "<redacted>";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no value for {field}")]
    MissingSecret { field: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub telemetry: TelemetrySection,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub transport: TransportSection,

    /// Devices loaded into the in-memory store at startup.
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetrySection {
    /// Delay between samples, e.g. `"1s"` or `"500ms"`.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Outbound queue depth per duplex connection.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_interval() -> String {
    "1s".into()
}
fn default_subscriber_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerSection {
    #[serde(default = "default_broker_queue")]
    pub queue: usize,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            queue: default_broker_queue(),
        }
    }
}

fn default_broker_queue() -> usize {
    1024
}

/// Shared secrets. Each may be given in plaintext or through the named
/// environment variable; the variable wins when set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthSection {
    pub jwt_secret: Option<String>,
    pub jwt_secret_env: Option<String>,
    pub agent_key: Option<String>,
    pub agent_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSection {
    /// Accept invalid certificates. Unset means accept, since appliances
    /// usually ship self-signed certificates; `false` uses the system store.
    pub insecure: Option<bool>,

    /// PEM bundle to trust instead of the system store.
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_timeout")]
    pub timeout: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            insecure: None,
            ca_cert: None,
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_timeout() -> String {
    "30s".into()
}
fn default_connect_timeout() -> String {
    "10s".into()
}

/// A seed device record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetEntry {
    pub id: u64,
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    pub kind: ProtocolKind,
    pub username: String,

    /// Password, token secret or API key (plaintext).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "opsdeck", "opsdeck").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("opsdeck");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

fn base_figment() -> Figment {
    Figment::new().merge(Serialized::defaults(Config::default()))
}

/// Load configuration from file + environment.
///
/// An explicit `path` must exist. Without one the platform default path
/// is used if present, so a bare environment is enough to run.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let file = match path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Some(path) => path.to_path_buf(),
        None => config_path(),
    };

    let config: Config = base_figment()
        .merge(Toml::file(&file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from a TOML string, without environment overrides.
pub fn load_from_str(toml: &str) -> Result<Config, ConfigError> {
    let config: Config = base_figment().merge(Toml::string(toml)).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Secret resolution ───────────────────────────────────────────────

/// Resolve a secret: the named env var first, then the plaintext value.
fn resolve_secret(
    field: &str,
    plaintext: Option<&str>,
    env_name: Option<&str>,
) -> Result<SecretString, ConfigError> {
    if let Some(val) = env_name.and_then(|name| std::env::var(name).ok()) {
        return Ok(SecretString::from(val));
    }
    if let Some(val) = plaintext {
        return Ok(SecretString::from(val.to_owned()));
    }
    Err(ConfigError::MissingSecret {
        field: field.into(),
    })
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| invalid(field, format!("'{raw}': {e}")))
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Check everything that does not need secrets resolved.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.sample_interval()?;
        if interval.is_zero() {
            return Err(invalid("telemetry.interval", "must be greater than zero"));
        }
        if self.telemetry.subscriber_buffer == 0 {
            return Err(invalid("telemetry.subscriber_buffer", "must be at least 1"));
        }
        if self.broker.queue == 0 {
            return Err(invalid("broker.queue", "must be at least 1"));
        }
        self.transport_config()?;

        let mut seen = std::collections::HashSet::new();
        for entry in &self.targets {
            if !seen.insert(entry.id) {
                return Err(invalid("targets", format!("duplicate id {}", entry.id)));
            }
            if entry.host.trim().is_empty() {
                return Err(invalid(format!("targets[{}].host", entry.id), "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("telemetry.interval", &self.telemetry.interval)
    }

    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let section = &self.transport;
        let tls = match (section.insecure, &section.ca_cert) {
            (Some(true), _) | (None, None) => TlsMode::DangerAcceptInvalid,
            (_, Some(path)) => TlsMode::CustomCa(path.clone()),
            (Some(false), None) => TlsMode::System,
        };
        Ok(TransportConfig {
            tls,
            timeout: parse_duration("transport.timeout", &section.timeout)?,
            connect_timeout: parse_duration("transport.connect_timeout", &section.connect_timeout)?,
        })
    }

    pub fn jwt_secret(&self) -> Result<SecretString, ConfigError> {
        resolve_secret(
            "auth.jwt_secret",
            self.auth.jwt_secret.as_deref(),
            self.auth.jwt_secret_env.as_deref(),
        )
    }

    pub fn agent_key(&self) -> Result<SecretString, ConfigError> {
        resolve_secret(
            "auth.agent_key",
            self.auth.agent_key.as_deref(),
            self.auth.agent_key_env.as_deref(),
        )
    }

    /// Build the runtime hub configuration, resolving every secret.
    pub fn to_hub_config(&self) -> Result<HubConfig, ConfigError> {
        Ok(HubConfig {
            sample_interval: self.sample_interval()?,
            subscriber_buffer: self.telemetry.subscriber_buffer,
            broker_queue: self.broker.queue,
            agent_key: self.agent_key()?,
            jwt_secret: self.jwt_secret()?,
            transport: self.transport_config()?,
        })
    }

    /// Target records for the in-memory store.
    pub fn seed_targets(&self) -> Result<Vec<Target>, ConfigError> {
        self.targets
            .iter()
            .map(|entry| {
                let secret = resolve_secret(
                    &format!("targets[{}].password", entry.id),
                    entry.password.as_deref(),
                    entry.password_env.as_deref(),
                )?;
                Ok(Target {
                    id: TargetId(entry.id),
                    name: entry.name.clone(),
                    host: entry.host.clone(),
                    port: entry.port,
                    kind: entry.kind,
                    username: entry.username.clone(),
                    secret,
                    active: entry.active,
                })
            })
            .collect()
    }

    /// Render as TOML with plaintext secrets masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut copy = self.clone();
        let mask = |s: &mut Option<String>| {
            if s.is_some() {
                *s = Some(REDACTED.into());
            }
        };
        mask(&mut copy.auth.jwt_secret);
        mask(&mut copy.auth.agent_key);
        for entry in &mut copy.targets {
            mask(&mut entry.password);
        }
        Ok(toml::to_string_pretty(&copy)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_apply_to_empty_file() {
        let cfg = load_from_str("").unwrap();
        assert_eq!(cfg.server.bind, default_bind());
        assert_eq!(cfg.sample_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(cfg.telemetry.subscriber_buffer, 64);
        assert_eq!(cfg.broker.queue, 1024);
        assert!(cfg.targets.is_empty());
    }

    #[test]
    fn humantime_intervals() {
        let cfg = load_from_str("[telemetry]\ninterval = \"250ms\"").unwrap();
        assert_eq!(cfg.sample_interval().unwrap(), Duration::from_millis(250));

        let err = load_from_str("[telemetry]\ninterval = \"soon\"").unwrap_err();
        assert!(err.to_string().contains("telemetry.interval"), "{err}");

        let err = load_from_str("[telemetry]\ninterval = \"0s\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn tls_mode_selection() {
        let tls = |toml: &str| load_from_str(toml).unwrap().transport_config().unwrap().tls;
        assert_eq!(tls(""), TlsMode::DangerAcceptInvalid);
        assert_eq!(tls("[transport]\ninsecure = false"), TlsMode::System);
        assert_eq!(
            tls("[transport]\ninsecure = false\nca_cert = \"/etc/ca.pem\""),
            TlsMode::CustomCa(PathBuf::from("/etc/ca.pem"))
        );
        assert_eq!(
            tls("[transport]\ninsecure = true\nca_cert = \"/etc/ca.pem\""),
            TlsMode::DangerAcceptInvalid
        );
    }

    #[test]
    fn plaintext_secret_used_when_env_unset() {
        let secret = resolve_secret(
            "auth.agent_key",
            Some("plain"),
            Some("OPSDECK_TEST_SURELY_UNSET_VARIABLE"),
        )
        .unwrap();
        assert_eq!(secret.expose_secret(), "plain");
    }

    #[test]
    fn missing_secret_is_reported_by_field() {
        let cfg = load_from_str("").unwrap();
        let err = cfg.to_hub_config().unwrap_err();
        assert_eq!(err.to_string(), "no value for auth.agent_key");
    }

    #[test]
    fn duplicate_target_ids_rejected() {
        let toml = r#"
            [[targets]]
            id = 1
            name = "a"
            host = "10.0.0.1"
            kind = "router_os"
            username = "admin"

            [[targets]]
            id = 1
            name = "b"
            host = "10.0.0.2"
            kind = "proxmox"
            username = "root@pam!ops"
        "#;
        let err = load_from_str(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate id 1"), "{err}");
    }

    #[test]
    fn redaction_masks_only_present_secrets() {
        let cfg = load_from_str("[auth]\njwt_secret = \"hunter2\"\nagent_key_env = \"KEY\"").unwrap();
        let rendered = cfg.to_redacted_toml().unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains(REDACTED));
        assert!(rendered.contains("agent_key_env = \"KEY\""));
    }
}
