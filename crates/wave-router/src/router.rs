//! Main router implementation
//!
//! The router is transport-agnostic: it accepts connections from any
//! [`TransportServer`], spawns one [`StreamPipeline`] per accepted stream,
//! and fans decoded messages out to channel subscribers.
//!
//! `Router` is a cheap handle. Clone it into every component that needs to
//! publish or subscribe; all clones share the same subscription table.
//!
//! # Example
//!
//! ```no_run
//! use wave_router::{Router, RouterConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Router::new(RouterConfig::default());
//!
//! let mut chat = router.subscribe("chat");
//! router.publish("chat", "u1", "hi", false)?;
//! let msg = chat.recv().await;
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wave_core::{DefaultSchema, LineCoding, MessageSchema, Value};
use wave_transport::{StreamConnection, TransportError, TransportServer};

#[cfg(feature = "quic")]
use wave_transport::{QuicConfig, QuicTransport};

#[cfg(feature = "tcp")]
use wave_transport::TcpServer;

use crate::{
    error::{Result, RouterError},
    pipeline::{PipelineStats, StreamPipeline},
    subscription::{Subscription, SubscriptionId, SubscriptionManager, DEFAULT_QUEUE_CAPACITY},
};

/// Pause after a listener-level accept failure
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Server name
    pub name: String,
    /// Capacity of each subscription queue
    pub queue_capacity: usize,
    /// Line coding expected on accepted streams
    pub line_coding: LineCoding,
    /// Period of the stale-listener cleanup task (zero disables it)
    pub cleanup_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "Wave Router".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            line_coding: LineCoding::Qpsk,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Wave router
#[derive(Clone)]
pub struct Router {
    config: Arc<RouterConfig>,
    /// Message factory and validator
    schema: Arc<dyn MessageSchema>,
    /// Subscription table
    subscriptions: Arc<SubscriptionManager>,
    /// Pipelines currently reading a stream
    active_streams: Arc<AtomicUsize>,
    /// Running flag
    running: Arc<RwLock<bool>>,
    /// Wakes accept loops and maintenance on stop
    shutdown: Arc<Notify>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self::with_schema(config, Arc::new(DefaultSchema::new()))
    }

    /// Create a router that builds and validates messages with `schema`
    pub fn with_schema(config: RouterConfig, schema: Arc<dyn MessageSchema>) -> Self {
        let subscriptions = SubscriptionManager::with_capacity(config.queue_capacity);
        Self {
            config: Arc::new(config),
            schema,
            subscriptions: Arc::new(subscriptions),
            active_streams: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(RwLock::new(true)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to a channel
    pub fn subscribe(&self, channel_id: &str) -> Subscription {
        self.subscriptions.subscribe(channel_id)
    }

    /// Remove a subscription. Unknown channels or ids are a logged no-op.
    pub fn unsubscribe(&self, channel_id: &str, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(channel_id, id)
    }

    /// Like [`unsubscribe`](Self::unsubscribe), reporting a miss as an error
    pub fn try_unsubscribe(&self, channel_id: &str, id: SubscriptionId) -> Result<()> {
        if self.unsubscribe(channel_id, id) {
            Ok(())
        } else {
            Err(RouterError::SubscriptionNotFound(format!(
                "{} on {}",
                id, channel_id
            )))
        }
    }

    /// Build a message and offer it to every subscriber of `channel_id`.
    ///
    /// Never blocks: a subscriber whose queue is full misses this message.
    /// Returns how many subscribers received it.
    pub fn publish(
        &self,
        channel_id: &str,
        sender_id: &str,
        payload: impl Into<Value>,
        is_persistent: bool,
    ) -> Result<usize> {
        let message = self
            .schema
            .create_message(channel_id, sender_id, payload.into(), is_persistent)
            .map_err(|e| {
                warn!(channel = channel_id, sender = sender_id, "Failed to create message: {}", e);
                e
            })?;

        if is_persistent {
            debug!(channel = channel_id, "Persistence requested; no store configured");
        }

        let report = self.subscriptions.broadcast(Arc::new(message));
        if report.delivered + report.dropped + report.closed == 0 {
            debug!(channel = channel_id, "No listeners for channel");
        } else {
            debug!(
                channel = channel_id,
                sender = sender_id,
                delivered = report.delivered,
                dropped = report.dropped,
                "Message published"
            );
        }

        Ok(report.delivered)
    }

    /// Prune subscriptions whose subscriber has gone away
    pub fn cleanup_stale_listeners(&self) -> usize {
        self.subscriptions.cleanup()
    }

    /// Run [`cleanup_stale_listeners`](Self::cleanup_stale_listeners) every
    /// `cleanup_interval` until the router stops.
    ///
    /// Returns `None` when the interval is zero.
    pub fn spawn_maintenance(&self) -> Option<JoinHandle<()>> {
        let period = self.config.cleanup_interval;
        if period.is_zero() {
            return None;
        }

        let router = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            while router.is_running() {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = router.cleanup_stale_listeners();
                        if pruned > 0 {
                            info!(pruned, "Maintenance pruned stale listeners");
                        }
                    }
                    _ = router.shutdown.notified() => break,
                }
            }
            debug!("Maintenance task stopped");
        }))
    }

    // =========================================================================
    // Transport-Agnostic Serving
    // =========================================================================

    /// Serve using any TransportServer implementation.
    ///
    /// Runs until [`stop`](Self::stop) is called or the server can accept no
    /// more connections. Failed accepts are logged and skipped.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
    {
        info!("Router accepting connections");

        while self.is_running() {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok(connection) => self.handle_connection(connection),
                    Err(TransportError::ConnectionClosed) => {
                        info!("Listener closed");
                        break;
                    }
                    Err(e @ TransportError::AcceptFailed(_)) => {
                        // e.g. out of file descriptors; retrying at once only spins
                        error!("Accept error: {}", e);
                        tokio::select! {
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                            _ = self.shutdown.notified() => break,
                        }
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = self.shutdown.notified() => break,
            }
        }

        server.close().await?;
        Ok(())
    }

    /// Start the router on QUIC.
    #[cfg(feature = "quic")]
    pub async fn serve_quic(
        &self,
        addr: SocketAddr,
        cert_der: Vec<u8>,
        key_der: Vec<u8>,
    ) -> Result<()> {
        self.serve_quic_with_config(addr, cert_der, key_der, QuicConfig::default())
            .await
    }

    /// Start the router on QUIC with custom transport settings.
    #[cfg(feature = "quic")]
    pub async fn serve_quic_with_config(
        &self,
        addr: SocketAddr,
        cert_der: Vec<u8>,
        key_der: Vec<u8>,
        config: QuicConfig,
    ) -> Result<()> {
        let server = QuicTransport::new_server_with_config(addr, cert_der, key_der, config)?;
        self.serve_on(server).await
    }

    /// Start the router on plain TCP, one stream per connection.
    #[cfg(feature = "tcp")]
    pub async fn serve_tcp(&self, addr: &str) -> Result<()> {
        let server = TcpServer::bind(addr).await?;
        self.serve_on(server).await
    }

    /// Accept streams from one connection until it closes
    fn handle_connection<C: StreamConnection>(&self, mut connection: C) {
        let router = self.clone();

        tokio::spawn(async move {
            let peer = connection.remote_addr();
            info!("New connection from {}", peer);

            while router.is_running() {
                tokio::select! {
                    accepted = connection.accept_stream() => match accepted {
                        Ok(stream) => {
                            debug!("Accepted new stream from {}", peer);
                            router.spawn_pipeline(stream, peer);
                        }
                        Err(TransportError::ConnectionClosed) => {
                            info!("Connection {} closed", peer);
                            break;
                        }
                        Err(e) => {
                            warn!("Failed to accept stream from {}: {}", peer, e);
                            break;
                        }
                    },
                    _ = router.shutdown.notified() => break,
                }
            }
        });
    }

    /// Run a decode pipeline over `reader` on its own task
    pub fn spawn_pipeline<R>(&self, reader: R, peer: SocketAddr) -> JoinHandle<PipelineStats>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pipeline = StreamPipeline::new(self.clone(), peer.to_string());
        let active = Arc::clone(&self.active_streams);
        active.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let stats = pipeline.run(reader).await;
            active.fetch_sub(1, Ordering::SeqCst);
            stats
        })
    }

    /// Stop accepting connections and stop maintenance.
    ///
    /// Streams already being read continue until they end.
    pub fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn schema(&self) -> &dyn MessageSchema {
        self.schema.as_ref()
    }

    /// Get subscription table
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Get subscription count
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of streams currently being decoded
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.config.name)
            .field("subscriptions", &self.subscriptions.len())
            .field("active_streams", &self.active_streams())
            .finish()
    }
}
