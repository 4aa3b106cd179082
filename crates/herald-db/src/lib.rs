//! # herald-db
//!
//! Storage layer for Herald. Persists, per room:
//! - **room** — the last event the room server told us about (desync guard)
//! - **joined_hosts** — the remote servers joined to the room
//!
//! Runs on PostgreSQL in production and SQLite for lite deployments and tests,
//! both through a single `sqlx::AnyPool`.

pub mod error;
pub mod membership;
pub mod repository;

use std::str::FromStr;

use anyhow::Result;
use herald_common::config::DatabaseConfig;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

pub use error::StoreError;

/// SQL dialect behind the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            anyhow::bail!("unsupported database URL scheme: {url}")
        }
    }
}

/// Shared database handle.
#[derive(Clone)]
pub struct Database {
    pub pool: AnyPool,
    pub backend: Backend,
}

impl Database {
    /// Connect using the `[database]` section of the config.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::connect_url(&config.url, config.max_connections, config.min_connections).await
    }

    /// Connect to `url`.
    ///
    /// An in-memory SQLite database lives and dies with its connection, so it
    /// gets exactly one that is never recycled.
    pub async fn connect_url(url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let backend: Backend = url.parse()?;

        tracing::info!(?backend, "Connecting to database...");
        let mut options = AnyPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections);
        if url.contains(":memory:") {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options.connect(url).await?;
        tracing::info!(?backend, "Connected to database");

        Ok(Self { pool, backend })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Health check — verify the database is reachable.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
