//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from environment.
///
/// `path` names an optional config file (without extension); `config` is used
/// when it is `None`. Should be called once at startup.
pub fn init(path: Option<&str>) -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load(path)?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build an [`AppConfig`] from defaults, the optional config file and the
/// `HERALD__*` environment, without touching the global.
pub fn load(path: Option<&str>) -> Result<AppConfig, config::ConfigError> {
    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.name", "localhost")?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 7780)?
        .set_default("database.url", "sqlite://herald.db?mode=rwc")?
        .set_default("database.max_connections", 10)?
        .set_default("database.min_connections", 1)?
        .set_default("federation.federation_port", 8448)?
        .set_default("federation.request_timeout_secs", 30)?
        .set_default("federation.max_retries", 5)?
        .set_default("federation.initial_backoff_ms", 1_000)?
        .set_default("federation.max_backoff_secs", 300)? // 5 min
        .set_default("federation.idle_queue_ttl_secs", 3_600)? // 1 hour
        .set_default("log.format", "text")?
        // Optional config file
        .add_source(config::File::with_name(path.unwrap_or("config")).required(false))
        // Environment variables (HERALD__SERVER__NAME, HERALD__DATABASE__URL, etc.)
        .add_source(
            config::Environment::with_prefix("HERALD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Public server name used for federation (e.g. "herald.example.com").
    /// Events are only accepted for sending when they originate from this name.
    pub name: String,
    /// Bind address of the internal API consumed by the room server.
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// `postgres://…` or `sqlite://…` connection URL.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FederationConfig {
    /// Port assumed for destinations that do not name one explicitly.
    pub federation_port: u16,
    /// Deadline for a single transaction PUT.
    pub request_timeout_secs: u64,
    /// Retries of one transaction before the destination is given up on.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    /// Idle destination queues older than this are dropped by the sweeper.
    pub idle_queue_ttl_secs: u64,
    /// Base64url Ed25519 seed. A throwaway key is generated when unset.
    pub signing_key_seed: Option<String>,
}

impl FederationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn idle_queue_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_queue_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Write daily-rotated `herald.log` files here instead of stdout.
    pub dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}
