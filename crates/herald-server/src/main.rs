//! # Herald Server
//!
//! Main binary for the Herald federation sender:
//! - membership store (PostgreSQL or SQLite)
//! - per-destination outgoing queues with a signed HTTP transmitter
//! - internal HTTP API for the room server
//! - background sweeper for idle destination queues

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use herald_common::config::{AppConfig, LogConfig, LogFormat};
use herald_db::Database;
use herald_federation::{
    FederationClient, FederationSender, OutgoingQueues, RetryPolicy, ServerKeyPair,
    TransactionSender,
};
use routes::{build_router, AppState};
use tracing_appender::non_blocking::WorkerGuard;

/// Herald — outbound federation sender.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file to load (without extension), e.g. `/etc/herald/config`.
    #[arg(short, long, env = "HERALD_CONFIG")]
    config: Option<String>,

    /// Apply database migrations and exit.
    #[arg(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = herald_common::config::init(cli.config.as_deref())?;

    // Initialize tracing (structured logging); the guard flushes file logs on exit
    let _log_guard = init_tracing(&config.log);

    tracing::info!("Starting Herald v{} as {}", env!("CARGO_PKG_VERSION"), config.server.name);

    // Connect to the database
    let db = Database::connect(&config.database).await?;
    db.migrate().await?;
    if cli.migrate_only {
        return Ok(());
    }

    // === Federation signing key ===
    let key = Arc::new(ServerKeyPair::load_or_generate(
        config.federation.signing_key_seed.as_deref(),
    )?);
    tracing::info!("Federation signing key ready: {}", key.key_id);

    // === Outgoing queues ===
    let client = Arc::new(FederationClient::new(
        &config.server.name,
        key,
        config.federation.federation_port,
        config.federation.request_timeout(),
    )?);
    let queues = OutgoingQueues::new(
        config.server.name.clone(),
        client,
        RetryPolicy::from(&config.federation),
    );
    spawn_idle_sweeper(queues.clone(), config);

    // === Internal API ===
    let router = build_router(AppState { sender: FederationSender::new(db, queues) });
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Internal API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

fn init_tracing(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "herald=debug,tower_http=debug".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let Some(dir) = &log.dir else {
        match log.format {
            LogFormat::Json => builder.json().init(),
            LogFormat::Text => builder.init(),
        }
        return None;
    };

    let file_appender = tracing_appender::rolling::daily(dir, "herald.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let builder = builder.with_writer(non_blocking).with_ansi(false);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Some(guard)
}

/// Periodically drop destination queues that have sat idle past the TTL.
fn spawn_idle_sweeper<S: TransactionSender>(queues: OutgoingQueues<S>, config: &AppConfig) {
    let ttl = config.federation.idle_queue_ttl();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ttl.max(std::time::Duration::from_secs(1)) / 2);
        loop {
            tick.tick().await;
            let evicted = queues.evict_idle(ttl).await;
            if evicted > 0 {
                tracing::debug!(evicted, "Idle destination queues swept");
            }
        }
    });
}
