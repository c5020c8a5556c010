//! hubsync event stream client: owns the long-lived server-push connection,
//! decodes and classifies messages, and feeds the reconciliation engine.
//!
//! Resource events are never processed inline; they are appended to the
//! engine's pending queue and picked up by the periodic drain. Control
//! signals act immediately: START discards the pending generation, LOADED
//! and EOP flush, SETTINGS replaces the settings value.

#![forbid(unsafe_code)]

pub mod sse;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use hubsync_core::{Settings, StreamMessage};
use hubsync_store::{Cell, Engine};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sse::FrameDecoder;

// ---------------- transport ----------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Connection seam for the event stream. The production implementation is
/// [`HttpTransport`]; tests script byte chunks through a stub.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<FrameStream, TransportError>;
}

/// SSE connection to `<backend>/events`, carrying session credentials.
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base: impl Into<String>, token: Option<String>) -> Self {
        Self { client, base: base.into(), token }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<FrameStream, TransportError> {
        let mut req = self
            .client
            .get(format!("{}/events", self.base))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(TransportError::Status(resp.status()));
        }
        Ok(Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(TransportError::from))))
    }
}

// ---------------- stream client ----------------

enum PumpOutcome {
    Shutdown,
    Disconnected,
}

/// Event stream client state machine.
///
/// Connection lifecycle: Connecting -> Open -> (messages | error) -> Backoff
/// -> Connecting, forever; the only terminal transition is the session's
/// shutdown channel. Failures are never surfaced to the caller — a dead
/// backend means an infinite fixed-delay reconnect loop, not an error.
pub struct StreamClient {
    transport: Arc<dyn Transport>,
    engine: Arc<Engine>,
    settings: Cell<Settings>,
    loaded_tx: watch::Sender<bool>,
    reconnect_delay: Duration,
    /// One-shot latch: the first LOADED/EOP flushes synchronously and flips
    /// the loaded flag; later LOADEDs are left to the periodic drain.
    initial_drain_done: bool,
}

impl StreamClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        engine: Arc<Engine>,
        settings: Cell<Settings>,
        loaded_tx: watch::Sender<bool>,
        reconnect_delay: Duration,
    ) -> Self {
        Self { transport, engine, settings, loaded_tx, reconnect_delay, initial_drain_done: false }
    }

    /// Drive the connection loop until the shutdown channel flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.transport.connect().await {
                Ok(frames) => {
                    info!("event stream open");
                    if let PumpOutcome::Shutdown = self.pump(frames, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "event stream connect failed"),
            }
            metrics::counter!("sync_stream_reconnects_total", 1u64);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("event stream client stopped");
    }

    /// Read one connection until it drops or shutdown is requested.
    async fn pump(&mut self, mut frames: FrameStream, shutdown: &mut watch::Receiver<bool>) -> PumpOutcome {
        let mut decoder = FrameDecoder::new();
        loop {
            tokio::select! {
                chunk = frames.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for payload in decoder.feed(&bytes) {
                            self.handle_payload(&payload);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "event stream transport error");
                        return PumpOutcome::Disconnected;
                    }
                    None => {
                        warn!("event stream closed by server");
                        return PumpOutcome::Disconnected;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return PumpOutcome::Shutdown;
                    }
                }
            }
        }
    }

    fn handle_payload(&mut self, payload: &str) {
        match serde_json::from_str::<StreamMessage>(payload) {
            Ok(msg) => self.handle_message(msg),
            // one bad message; the stream keeps going
            Err(e) => warn!(error = %e, "dropping undecodable stream message"),
        }
    }

    fn handle_message(&mut self, msg: StreamMessage) {
        metrics::counter!("sync_stream_messages_total", 1u64);
        match msg.into_event() {
            Ok(ev) => self.engine.queue().push(ev),
            Err(StreamMessage::Start) => {
                debug!("stream START: resetting pending event queue");
                self.engine.queue().clear();
            }
            Err(StreamMessage::Loaded) => {
                if !self.initial_drain_done {
                    self.engine.drain();
                    self.initial_drain_done = true;
                    info!("initial snapshot loaded");
                }
                let _ = self.loaded_tx.send(true);
            }
            Err(StreamMessage::Eop) => {
                // flush marker: always drain; the first one doubles as LOADED
                self.engine.drain();
                if !self.initial_drain_done {
                    self.initial_drain_done = true;
                    info!("initial snapshot loaded (EOP)");
                    let _ = self.loaded_tx.send(true);
                }
            }
            Err(StreamMessage::Settings { settings }) => {
                debug!("settings pushed by backend");
                self.settings.publish(settings);
            }
            // into_event only returns control signals as Err
            Err(_) => {}
        }
    }
}

// ---------------- session liveness ----------------

/// Periodically verify the session is still authenticated. A non-200
/// response or a network failure flips the `authenticated` channel to
/// false; the redirect that follows is the caller's concern.
pub fn spawn_liveness(
    client: reqwest::Client,
    base: String,
    token: Option<String>,
    interval: Duration,
    authenticated_tx: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !check_authenticated(&client, &base, token.as_deref()).await {
                        let _ = authenticated_tx.send(false);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("liveness monitor stopped");
    })
}

async fn check_authenticated(client: &reqwest::Client, base: &str, token: Option<&str>) -> bool {
    let mut req = client.get(format!("{base}/authenticated"));
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    match req.send().await {
        Ok(resp) if resp.status() == reqwest::StatusCode::OK => true,
        Ok(resp) => {
            warn!(status = %resp.status(), "session liveness check rejected");
            false
        }
        Err(e) => {
            warn!(error = %e, "session liveness check failed");
            false
        }
    }
}
