//! Broker-neutral types and error definitions

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::Deserialize;

/// Failure reported by the broker client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    /// Protocol reply code, when the broker supplied one
    pub code: Option<u16>,
    pub message: String,
}

impl BrokerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Asynchronous connection-level notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(String),
    Closed,
}

/// Listener registered on a connection
pub type ConnectionEventHandler = std::sync::Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// A message delivered to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Bytes,
}

/// A registered consumer and its delivery stream
pub struct Consumer {
    pub tag: String,
    pub deliveries: BoxStream<'static, Result<Delivery, BrokerError>>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("tag", &self.tag).finish()
    }
}

/// Per-message publish options
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOptions {
    #[serde(default)]
    pub mandatory: bool,
    /// Ask the broker to persist the message (delivery mode 2)
    #[serde(default)]
    pub persistent: bool,
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub priority: Option<u8>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub app_id: Option<String>,
}
