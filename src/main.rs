use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crmdash::api::rate_limit::spawn_cleanup_task;
use crmdash::config::Config;
use crmdash::notifications::mailer_from_config;
use crmdash::AppState;

/// How often stale rate limiter entries are dropped
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[derive(Parser, Debug)]
#[command(name = "crmdash")]
#[command(author, version, about = "Multi-tenant CRM backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CRMDASH_CONFIG", default_value = "crmdash.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        env = %config.server.environment,
        "Starting crmdash v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize database
    let db = crmdash::db::init(&config.database).await?;

    let mailer = mailer_from_config(&config.email);

    let state = Arc::new(AppState::new(config.clone(), db, mailer)?);
    spawn_cleanup_task(state.rate_limiter.clone(), RATE_LIMIT_CLEANUP_SECS);

    let app = crmdash::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("GraphQL endpoint listening on http://{}/graphql", addr);
    if config.server.playground {
        tracing::info!("GraphiQL available at http://{}/graphql", addr);
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
