mod chat_history;
mod config;
mod network;
mod pipeline;
mod player;
mod session;
mod state;
mod streaming;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pickaxe_protocol::transport::{Transport, UdpTransport};
use pickaxe_world::ChunkStore;
use tracing::info;

use crate::chat_history::ChatHistory;
use crate::config::ServerConfig;
use crate::state::ServerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting pickaxe server");

    let config = ServerConfig::load(Path::new("pickaxe.toml"))?;
    info!(bind = %config.bind, port = config.port, world_seed = config.world_seed, "config loaded");

    let store = ChunkStore::new(config.world_seed, config.world_dir.clone());
    let loaded = store.hydrate_from_disk().context("failed to hydrate world from disk")?;
    info!(loaded, "hydrated chunks from disk");
    let generated = store.generate_initial_two_pass(2);
    info!(generated, "generated chunks around spawn");

    let chat_history = ChatHistory::open(&config.chat_history_path).context("failed to open chat history")?;

    let bind_addr: SocketAddr =
        format!("{}:{}", config.bind, config.port).parse().context("invalid bind address")?;

    let state = Arc::new(ServerState::new(config, store, chat_history));

    let transport: Arc<dyn Transport> =
        Arc::new(UdpTransport::bind(bind_addr).await.context("failed to bind transport")?);
    info!(addr = %transport.local_addr(), "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let ctrlc_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        let _ = ctrlc_tx.send(true);
    });

    let prep_worker = tokio::spawn(pipeline::run_prep_worker(Arc::clone(&state)));

    network::run(Arc::clone(&transport), Arc::clone(&state), shutdown_rx).await;

    prep_worker.abort();

    let saved = state.store.save_dirty();
    info!(saved, "saved dirty chunks on shutdown");

    // Give in-flight retransmits a moment to flush before the process exits.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(())
}
