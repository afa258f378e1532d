use std::{net::IpAddr, path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloister::{
    config::{Config, DEFAULT_HOST, DEFAULT_PORT},
    routes, AppState,
};

#[derive(Parser, Debug)]
#[command(name = "cloister")]
#[command(about = "Local hub for chat transcript history", long_about = None)]
struct Args {
    /// Port to run the server on
    #[arg(short, long, env = "CLOISTER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "CLOISTER_HOST", default_value_t = DEFAULT_HOST)]
    host: IpAddr,

    /// Transcript root (defaults to ~/.claude/projects)
    #[arg(long, env = "CLOISTER_PROJECTS_DIR")]
    projects_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloister=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::new(args.projects_dir, args.host, args.port)?;
    info!("Reading transcripts from {}", config.projects_dir.display());

    let state = Arc::new(AppState::new(&config));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Cloister running at http://{}", config.bind_addr);

    // Run HTTP server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down gracefully...");
        },
    }
}
