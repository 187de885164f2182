use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use merge_sync_client::auth::{
    Credentials, FileTokenStore, HttpAuthApi, MemoryTokenStore, SessionController, TokenStore,
};
use merge_sync_client::client::{ClientContext, Command};
use merge_sync_client::config::ClientConfig;
use merge_sync_client::metrics::{self, Metrics};
use merge_sync_client::net::WsConnector;
use merge_sync_client::notify::LogNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Merge Sync Client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ClientConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: origin={}, socket={}",
        config.origin,
        config.socket_url()?
    );

    let metrics = Arc::new(Metrics::new());

    if cfg!(feature = "metrics_server") {
        if let Some(port) = config.metrics_port {
            let metrics_clone = metrics.clone();
            tokio::spawn(async move {
                if let Err(e) = metrics::start_metrics_server(metrics_clone, port).await {
                    error!("Metrics server error: {}", e);
                }
            });
        }
    }

    // Session
    let tokens: Arc<dyn TokenStore> = match &config.token_path {
        Some(path) => Arc::new(FileTokenStore::new(path.clone())),
        None => Arc::new(MemoryTokenStore::new()),
    };
    let api = Arc::new(HttpAuthApi::from_config(&config)?);
    let session = Arc::new(SessionController::new(api, tokens));

    let authenticated = match session.is_auth().await {
        Ok(authenticated) => authenticated,
        Err(e) => {
            warn!("Session check failed: {}", e);
            false
        }
    };
    if !authenticated {
        let credentials = credentials_from_env()
            .context("Not authenticated and LOGIN_USER / LOGIN_PASSWORD are not set")?;
        session.login(&credentials).await?;
    }

    // Socket and game state
    let (connector, events) = WsConnector::channel();
    let mut client = ClientContext::new(
        &config,
        Box::new(connector),
        session.clone(),
        Box::new(LogNotifier),
        metrics.clone(),
    )?;
    client.init();
    client.init_game();

    // Shutdown signal handler
    let (commands_tx, commands) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            // Keep the command channel open, the client runs until killed
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
        let _ = commands_tx.send(Command::Shutdown);
    });

    client.run(events, commands).await;

    Ok(())
}

fn credentials_from_env() -> Option<Credentials> {
    let user = std::env::var("LOGIN_USER").ok()?.parse().ok()?;
    let password = std::env::var("LOGIN_PASSWORD").ok()?;
    Some(Credentials { user, password })
}
