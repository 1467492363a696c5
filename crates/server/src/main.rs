//! Snakepit game server.

use snakepit_server::config::Config;
use snakepit_server::server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Snakepit Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; positional arguments override port and bind address
    let mut config = Config::load()?;
    let mut args = std::env::args().skip(1);
    if let Some(port) = args.next() {
        config.server.port = port.parse()?;
    }
    if let Some(bind) = args.next() {
        config.server.bind = bind;
    }
    info!("Loaded configuration");
    info!("  Bind: {}:{}", config.server.bind, config.server.port);

    // Start the game server
    server::run(config).await?;

    Ok(())
}
