//! MCPHub server entry point

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcphub::cli::Cli;
use mcphub::config::Config;
use mcphub::pool::ConnectionManager;
use mcphub::registry::SqliteRegistry;
use mcphub::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_overrides(&cli);
    config.validate()?;

    let registry = Arc::new(match &config.database_path {
        Some(path) => SqliteRegistry::open(path.clone())?,
        None => SqliteRegistry::open_default()?,
    });

    let manager = ConnectionManager::new(Arc::clone(&registry), config.idle_timeout());
    manager.start();

    let shutdown = CancellationToken::new();
    let state = AppState {
        registry,
        manager: Arc::clone(&manager),
        shutdown: shutdown.clone(),
    };

    // ctrl-c flips the token; axum drains, then the pool tears down.
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            trigger.cancel();
        }
    });

    server::serve(&config.listen_addr, state).await?;

    manager.stop().await;
    Ok(())
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "mcphub=debug" } else { "mcphub=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
