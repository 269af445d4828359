//! Broker client traits

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::options::ConnectionOptions;
use super::types::{BrokerError, Consumer, ConnectionEventHandler, PublishOptions};

/// Entry point of a broker client
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new connection
    async fn connect(
        &self,
        url: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// An open broker session
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a channel multiplexed over this connection
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Register a listener for asynchronous error and close notifications
    fn on_event(&self, handler: ConnectionEventHandler);

    async fn close(&self) -> Result<(), BrokerError>;
}

/// The protocol's unit of concurrent operation
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn assert_exchange(
        &self,
        name: &str,
        kind: &str,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn assert_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Hand one message to the transport. Does not wait for a broker confirm.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> Result<(), BrokerError>;

    /// Register a manual-ack consumer
    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}
