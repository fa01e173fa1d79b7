use anyhow::Context;
use axum::routing::get;
use axum::Router;
use marble_server::config::ServerConfig;
use marble_server::game_loop::{run_game_loop, GameBroadcast, GameCommand};
use marble_server::level::LevelData;
use marble_server::persistence::{JsonFileRecorder, LogRecorder, RoundRecorder};
use marble_server::round::RoundManager;
use marble_server::ws::{ws_handler, AppState};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = ServerConfig::load_or_default();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid server configuration: {}", e);
    }

    let level = match &config.level_path {
        Some(path) => LevelData::load(path)?,
        None => LevelData::builtin(),
    };
    tracing::info!("Loaded level {}", level.id);

    let manager = RoundManager::new(&config, &level).context("building level geometry")?;

    let recorder: Arc<dyn RoundRecorder> = match &config.stats_dir {
        Some(dir) => {
            tracing::info!("Recording rounds to {}", dir.display());
            Arc::new(JsonFileRecorder::new(dir)?)
        }
        None => Arc::new(LogRecorder),
    };

    let listen_addr = config.listen_addr.clone();

    let (game_tx, game_rx) = mpsc::channel::<GameCommand>(256);
    let (broadcast_tx, _) = broadcast::channel::<GameBroadcast>(64);

    // Spawn game loop
    tokio::spawn(async move {
        run_game_loop(game_rx, broadcast_tx, config, manager, recorder).await;
    });

    // Axum app
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppState { game_tx });

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {}", listen_addr))?;
    tracing::info!("Marble server listening on {}", listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
