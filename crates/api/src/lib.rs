//! hubsync session façade.
//!
//! A [`SyncSession`] is the context object for one mounted synchronization
//! session: it builds a fresh registry, spawns the drain loop, the event
//! stream client, and the liveness monitor, and exposes the only surface
//! the rest of the application may consume — read-only collections, the
//! initial-load flag, the settings value, and the authenticated flag.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use hubsync_core::Settings;
use hubsync_store::{
    spawn_drain_loop, Cell, CellReader, CollectionReader, Engine, GroupedReader, Registry,
};
use hubsync_stream::{spawn_liveness, HttpTransport, StreamClient, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Connection and cadence settings for one sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub drain_interval: Duration,
    pub reconnect_delay: Duration,
    pub liveness_interval: Duration,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            drain_interval: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(1),
            liveness_interval: Duration::from_secs(30),
        }
    }

    /// Read connection settings from `HUBSYNC_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("HUBSYNC_BACKEND")
            .map_err(|_| anyhow::anyhow!("HUBSYNC_BACKEND is not set"))?;
        let mut cfg = Self::new(base_url);
        cfg.token = std::env::var("HUBSYNC_TOKEN").ok();
        if let Some(ms) = env_u64("HUBSYNC_DRAIN_MS") {
            cfg.drain_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("HUBSYNC_RECONNECT_MS") {
            cfg.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("HUBSYNC_LIVENESS_SECS") {
            cfg.liveness_interval = Duration::from_secs(secs);
        }
        Ok(cfg)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// One mounted synchronization session.
///
/// Dropping the session without calling [`SyncSession::shutdown`] aborts
/// nothing by itself; callers own the teardown, exactly once.
pub struct SyncSession {
    engine: Arc<Engine>,
    settings: CellReader<Settings>,
    loaded: watch::Receiver<bool>,
    authenticated: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    /// Start a session against the configured backend.
    pub fn start(config: SyncConfig) -> Self {
        let http = reqwest::Client::new();
        let transport = Arc::new(HttpTransport::new(
            http.clone(),
            config.base_url.clone(),
            config.token.clone(),
        ));
        Self::start_with_transport(config, transport, Some(http))
    }

    /// Start with a custom transport. When no HTTP client is supplied the
    /// liveness monitor is not spawned (tests).
    pub fn start_with_transport(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        http: Option<reqwest::Client>,
    ) -> Self {
        let engine = Arc::new(Engine::new(Registry::build()));
        let settings_cell = Cell::new(Settings::Null);
        let settings = settings_cell.reader();
        let (loaded_tx, loaded) = watch::channel(false);
        let (authenticated_tx, authenticated) = watch::channel(true);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.push(spawn_drain_loop(
            engine.clone(),
            config.drain_interval,
            shutdown_rx.clone(),
        ));
        let client = StreamClient::new(
            transport,
            engine.clone(),
            settings_cell,
            loaded_tx,
            config.reconnect_delay,
        );
        tasks.push(tokio::spawn(client.run(shutdown_rx.clone())));
        if let Some(http) = http {
            tasks.push(spawn_liveness(
                http,
                config.base_url.clone(),
                config.token.clone(),
                config.liveness_interval,
                authenticated_tx,
                shutdown_rx,
            ));
        }
        info!(backend = %config.base_url, "sync session started");
        Self { engine, settings, loaded, authenticated, shutdown, tasks }
    }

    /// Read-only collection for a direct-bound kind.
    pub fn collection(&self, group_version: &str, kind: &str) -> Option<CollectionReader> {
        self.engine.reader(group_version, kind)
    }

    /// Read-only grouped dictionary for a namespace-mapped kind.
    pub fn grouped(&self, group_version: &str, kind: &str) -> Option<GroupedReader> {
        self.engine.grouped_reader(group_version, kind)
    }

    /// True once the initial snapshot has been delivered and applied.
    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Change subscription for the initial-load flag.
    pub fn loaded_changed(&self) -> watch::Receiver<bool> {
        self.loaded.clone()
    }

    /// Latest server-pushed settings; last write wins.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.current()
    }

    /// Flips to false when the backend rejects the session.
    pub fn authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.clone()
    }

    /// Tear the session down: stops the drain loop, the stream client, and
    /// the liveness monitor, cancelling any pending reconnect timer.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("sync session stopped");
    }
}
