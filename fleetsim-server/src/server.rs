//! Daemon setup and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use fleetsim_core::{
    random, AuthGate, Event, EventLevel, EventLog, FileBackend, FleetStore, MemoryBackend,
    SharedStore, SimulationTicker, StateBackend,
};

use crate::config::Config;
use crate::http_server::{self, AppState};

/// Run the daemon until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let backend: Arc<dyn StateBackend> = if config.storage.persist {
        let backend = FileBackend::new(&config.storage.state_dir)
            .with_context(|| format!("Failed to open state directory {}", config.storage.state_dir))?;
        info!(path = %backend.dir().display(), "Using file-backed state");
        Arc::new(backend)
    } else {
        info!("Persistence disabled, state is kept in memory");
        Arc::new(MemoryBackend::new())
    };

    let events = Arc::new(EventLog::new());
    let rng = random::from_seed(config.simulation.seed);
    if let Some(seed) = config.simulation.seed {
        info!(seed, "Using seeded random source");
    }

    let store = FleetStore::initialize(
        config.simulation.clone(),
        backend.clone(),
        events.clone(),
        rng,
        Utc::now(),
    );
    let store: SharedStore = Arc::new(RwLock::new(store));
    let auth = AuthGate::new(config.auth.clone(), backend, events.clone());

    let ticker = SimulationTicker::start(store.clone(), config.simulation.tick_interval_duration());

    let state = Arc::new(AppState {
        store: store.clone(),
        auth: RwLock::new(auth),
        events: events.clone(),
        compatibility_delay: config.simulation.compatibility_check_delay_duration(),
    });
    let app = http_server::build_router(state);

    let addr: SocketAddr = config
        .server
        .listen_address
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.server.listen_address))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(address = %addr, "HTTP API listening");
    events.push(Event::system(EventLevel::Info, format!("Daemon listening on {}", addr)));

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    ticker.stop().await;
    store.read().await.persist();
    info!("Final state persisted");

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}
