use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use zenswap::config::{Cli, Config};
use zenswap::state::AppState;
use zenswap::{routes, seed, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure uploads directory exists
    std::fs::create_dir_all(config.uploads_path())?;

    // Open the record store; the server does not start without one
    let store = store::open(&config).await?;

    if cli.seed {
        seed::seed_demo(store.as_ref()).await?;
    }

    let app = routes::app(AppState::new(store, config.clone()));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
