//! Channel handed to a single scenario invocation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::service::BrokerChannel;
use super::types::{BrokerError, Consumer, PublishOptions};

/// Channel view used by one scenario invocation.
///
/// Either a channel of its own, closed once the invocation and every background
/// subscription holding it are gone, or the connection's shared channel where each
/// call holds a common lock for exactly its own duration.
pub struct ScenarioChannel {
    inner: Arc<dyn BrokerChannel>,
    lock: Option<Arc<Mutex<()>>>,
    close_on_drop: bool,
    closed: AtomicBool,
}

impl ScenarioChannel {
    /// Channel owned by one invocation
    pub fn owned(inner: Arc<dyn BrokerChannel>) -> Self {
        Self {
            inner,
            lock: None,
            close_on_drop: true,
            closed: AtomicBool::new(false),
        }
    }

    /// Shared channel serialized through `lock`
    pub fn shared(inner: Arc<dyn BrokerChannel>, lock: Arc<Mutex<()>>) -> Self {
        Self {
            inner,
            lock: Some(lock),
            close_on_drop: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_shared(&self) -> bool {
        self.lock.is_some()
    }

    async fn serialize(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

#[async_trait]
impl BrokerChannel for ScenarioChannel {
    async fn assert_exchange(
        &self,
        name: &str,
        kind: &str,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let _guard = self.serialize().await;
        self.inner.assert_exchange(name, kind, durable).await
    }

    async fn assert_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        let _guard = self.serialize().await;
        self.inner.assert_queue(name, durable).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let _guard = self.serialize().await;
        self.inner.bind_queue(queue, exchange, routing_key).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> Result<(), BrokerError> {
        let _guard = self.serialize().await;
        self.inner.publish(exchange, routing_key, payload, options).await
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        let _guard = self.serialize().await;
        self.inner.consume(queue).await
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let _guard = self.serialize().await;
        self.inner.ack(delivery_tag).await
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let _guard = self.serialize().await;
        self.inner.cancel(consumer_tag).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        // The shared channel belongs to the connection manager
        if self.is_shared() || self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.close().await
    }
}

impl Drop for ScenarioChannel {
    fn drop(&mut self) {
        if !self.close_on_drop || self.closed.load(Ordering::SeqCst) {
            return;
        }
        let channel = Arc::clone(&self.inner);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = channel.close().await {
                    debug!("Scenario channel close error: {}", e);
                }
            });
        }
    }
}
