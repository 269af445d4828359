//! Test Utilities Module
//!
//! In-memory broker and event sink for unit tests.
//! This module is only compiled when running tests.

#![cfg(test)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::broker::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, ConnectionEvent,
    ConnectionEventHandler, ConnectionOptions, Consumer, PublishOptions,
};
use crate::events::{Event, EventSink};

// ============================================================================
// Fake Broker
// ============================================================================

#[derive(Default)]
struct Recorded {
    urls: Vec<String>,
    connection_closes: usize,
    handlers: Vec<Option<ConnectionEventHandler>>,
}

/// Broker that accepts every call and records connection lifecycle
#[derive(Default)]
pub struct FakeBroker {
    recorded: Arc<Mutex<Recorded>>,
    channel_error: Option<String>,
    close_first_connection: bool,
}

impl FakeBroker {
    /// Every `create_channel` call fails with `message`
    pub fn failing_channel(message: &str) -> Self {
        Self {
            channel_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// The first connection reports itself closed while its channel is being created
    pub fn closing_on_channel() -> Self {
        Self {
            close_first_connection: true,
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.recorded.lock().unwrap().urls.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.recorded.lock().unwrap().urls.clone()
    }

    pub fn connection_closes(&self) -> usize {
        self.recorded.lock().unwrap().connection_closes
    }

    /// Deliver `event` to the listener of the `index`-th connection
    pub fn fire(&self, index: usize, event: ConnectionEvent) {
        let handler = self.recorded.lock().unwrap().handlers[index].clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn connect(
        &self,
        url: &str,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let index = {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.urls.push(url.to_string());
            recorded.handlers.push(None);
            recorded.handlers.len() - 1
        };
        Ok(Arc::new(FakeConnection {
            index,
            recorded: Arc::clone(&self.recorded),
            channel_error: self.channel_error.clone(),
            close_during_channel: self.close_first_connection && index == 0,
        }))
    }
}

struct FakeConnection {
    index: usize,
    recorded: Arc<Mutex<Recorded>>,
    channel_error: Option<String>,
    close_during_channel: bool,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        if self.close_during_channel {
            let handler = self.recorded.lock().unwrap().handlers[self.index].clone();
            if let Some(handler) = handler {
                handler(ConnectionEvent::Closed);
            }
        }
        match &self.channel_error {
            Some(message) => Err(BrokerError::new(message.clone())),
            None => Ok(Arc::new(FakeChannel)),
        }
    }

    fn on_event(&self, handler: ConnectionEventHandler) {
        self.recorded.lock().unwrap().handlers[self.index] = Some(handler);
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.recorded.lock().unwrap().connection_closes += 1;
        Ok(())
    }
}

struct FakeChannel;

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn assert_exchange(&self, _: &str, _: &str, _: bool) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn assert_queue(&self, _: &str, _: bool) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn bind_queue(&self, _: &str, _: &str, _: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(
        &self,
        _: &str,
        _: &str,
        _: Bytes,
        _: &PublishOptions,
    ) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn consume(&self, _: &str) -> Result<Consumer, BrokerError> {
        Ok(Consumer {
            tag: "fake-consumer".to_string(),
            deliveries: futures_util::stream::pending().boxed(),
        })
    }

    async fn ack(&self, _: u64) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn cancel(&self, _: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

// ============================================================================
// Event Recording
// ============================================================================

/// Sink that keeps every event in emission order
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
