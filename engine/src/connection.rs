//! Broker connection lifecycle
//!
//! One [`ConnectionManager`] owns at most one live broker connection plus one shared
//! channel. It is created lazily by the first scenario invocation, reused by every
//! later one, and reset when the broker reports the connection closed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, ConnectionEvent,
    ConnectionEventHandler, ConnectionOptions, ScenarioChannel, redact_url,
};
use crate::config::{ChannelStrategy, EngineConfig};
use crate::error::EngineError;
use crate::events::{Event, EventSink};

type SessionSlot = Arc<RwLock<Option<Arc<BrokerSession>>>>;

/// A live connection and its shared channel
pub struct BrokerSession {
    connection: Arc<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
    channel_lock: Arc<Mutex<()>>,
    generation: u64,
}

impl BrokerSession {
    pub fn connection(&self) -> &Arc<dyn BrokerConnection> {
        &self.connection
    }

    /// The channel created together with the connection
    pub fn channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.channel
    }

    /// Strictly increasing across connection attempts
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Channel for one scenario invocation
    pub async fn open_channel(
        &self,
        strategy: ChannelStrategy,
    ) -> Result<ScenarioChannel, EngineError> {
        match strategy {
            ChannelStrategy::PerScenario => self
                .connection
                .create_channel()
                .await
                .map(ScenarioChannel::owned)
                .map_err(EngineError::Connection),
            ChannelStrategy::Shared => Ok(ScenarioChannel::shared(
                Arc::clone(&self.channel),
                Arc::clone(&self.channel_lock),
            )),
        }
    }
}

/// Owns the engine's broker connection
pub struct ConnectionManager {
    config: EngineConfig,
    broker: Arc<dyn Broker>,
    sink: Arc<dyn EventSink>,
    state: SessionSlot,
    generation: AtomicU64,
    connect_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(config: EngineConfig, broker: Arc<dyn Broker>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            broker,
            sink,
            state: Arc::new(RwLock::new(None)),
            generation: AtomicU64::new(0),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current session, if connected
    pub fn current(&self) -> Option<Arc<BrokerSession>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Open a fresh connection and shared channel, replacing any existing one
    pub async fn connect(&self) -> Result<Arc<BrokerSession>, EngineError> {
        let _guard = self.connect_lock.lock().await;
        self.open().await
    }

    /// Return the current session, connecting first if there is none.
    ///
    /// Concurrent callers racing on an empty state produce a single connection.
    pub async fn ensure_connected(&self) -> Result<Arc<BrokerSession>, EngineError> {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(session) = self.current() {
            return Ok(session);
        }
        self.open().await
    }

    /// Close the shared channel then the connection. Failures are logged, never returned.
    pub async fn cleanup(&self) {
        let _guard = self.connect_lock.lock().await;
        let Some(session) = self.take() else {
            debug!("No AMQP connection to clean up");
            return;
        };
        close_session(&session).await;
    }

    // Caller must hold connect_lock
    async fn open(&self) -> Result<Arc<BrokerSession>, EngineError> {
        if let Some(previous) = self.take() {
            debug!(
                "Replacing AMQP connection (generation {})",
                previous.generation
            );
            close_session(&previous).await;
        }

        let options = ConnectionOptions::resolve(&self.config).await?;
        let url = redact_url(&self.config.url);
        debug!("Connecting to {} with options {}", url, options.redacted());

        let connection = self
            .broker
            .connect(&self.config.url, &options)
            .await
            .map_err(|e| {
                counter!("amqp.connections.failed").increment(1);
                EngineError::Connection(e)
            })?;

        // Registered before the channel opens so early notifications reach the sink
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let closed = Arc::new(AtomicBool::new(false));
        connection.on_event(self.listener(generation, Arc::clone(&closed)));

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                counter!("amqp.connections.failed").increment(1);
                if let Err(close_err) = connection.close().await {
                    debug!("Failed to close half-open connection: {}", close_err);
                }
                return Err(EngineError::Connection(e));
            }
        };

        let session = Arc::new(BrokerSession {
            connection,
            channel,
            channel_lock: Arc::new(Mutex::new(())),
            generation,
        });
        {
            // The listener flips `closed` under this same lock
            let mut slot = self.write();
            if closed.load(Ordering::SeqCst) {
                drop(slot);
                counter!("amqp.connections.failed").increment(1);
                return Err(EngineError::Connection(BrokerError::new(
                    "Connection closed while opening",
                )));
            }
            *slot = Some(Arc::clone(&session));
        }

        counter!("amqp.connections.opened").increment(1);
        info!("Connected to {}", url);
        Ok(session)
    }

    fn listener(&self, generation: u64, closed: Arc<AtomicBool>) -> ConnectionEventHandler {
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);

        Arc::new(move |event| match event {
            ConnectionEvent::Error(message) => {
                warn!("AMQP connection error: {}", message);
                sink.emit(Event::Error { message });
            }
            ConnectionEvent::Closed => {
                let mut slot = state.write().unwrap_or_else(PoisonError::into_inner);
                closed.store(true, Ordering::SeqCst);
                // Events from a replaced connection must not clear its successor
                if slot.as_ref().is_some_and(|s| s.generation == generation) {
                    *slot = None;
                    info!("AMQP connection closed (generation {})", generation);
                }
            }
        })
    }

    fn take(&self) -> Option<Arc<BrokerSession>> {
        self.write().take()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Arc<BrokerSession>>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn close_session(session: &BrokerSession) {
    if let Err(e) = session.channel.close().await {
        warn!("{}", EngineError::Cleanup(e));
    }
    if let Err(e) = session.connection.close().await {
        warn!("{}", EngineError::Cleanup(e));
    }
    debug!("AMQP connection closed (generation {})", session.generation);
}
