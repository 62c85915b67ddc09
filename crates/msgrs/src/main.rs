#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use msgrs::config::{Args, ServerConfig};
use msgrs::metrics::{start_metrics_server, HealthState};
use msgrs::run;
use msgrs::server::ServerState;
use msgrs::storage::MemoryStorage;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: ServerConfig = args.clone().into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let storage = Arc::new(MemoryStorage::new());
    match &args.users {
        Some(path) => {
            let count = seed_users(&storage, path)?;
            info!("registered {} accounts from {}", count, path.display());
        }
        None => warn!("no account seed file given, nobody can log in"),
    }

    let state = Arc::new(ServerState::new(config.clone(), storage));

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let health_state = HealthState::new();

    tokio::spawn({
        let health_state = health_state.clone();
        async move {
            if let Err(e) = start_metrics_server(config.metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    tokio::select! {
        result = run(listener, state) => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

/// Seed accounts from a `name:password` per-line file. Blank lines and
/// `#` comments are skipped.
fn seed_users(storage: &MemoryStorage, path: &Path) -> Result<usize> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading account seed file {}", path.display()))?;
    let mut count = 0;
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, password)) = line.split_once(':') else {
            anyhow::bail!("{}:{}: expected name:password", path.display(), lineno + 1);
        };
        storage.add_user(name.trim(), password);
        count += 1;
    }
    Ok(count)
}
