//! The broker (spec §4.4): a single authoritative ordering and persistence
//! point for every room's posts. It never runs game logic — it assigns each
//! post a server time and an index, appends it to that room's log, and
//! fans it out to every connection watching the room. All simulation
//! happens client-side in `postnet-engine`, replaying the exact same
//! ordered stream this crate hands out.

mod config;
mod server;
mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;

pub use config::BrokerConfig;
pub use state::{BrokerState, ConnHandle, RoomSub, Shared};

/// Binds `config.bind:config.port` and serves forever.
pub async fn serve(config: &BrokerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
    log::info!("postnet-broker listening on {}", listener.local_addr()?);
    serve_listener(listener, config.data_dir.clone()).await
}

/// Serves forever on an already-bound listener. Split out from [`serve`] so
/// tests can bind an ephemeral port (`"127.0.0.1:0"`) and read back the
/// actual address before handing the listener off.
pub async fn serve_listener(listener: TcpListener, data_dir: impl Into<PathBuf>) -> anyhow::Result<()> {
    let state: Shared = Arc::new(Mutex::new(BrokerState::new(data_dir)));
    server::accept_loop(listener, state).await
}
