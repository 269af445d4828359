//! Scenario definitions and per-iteration context

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::broker::PublishOptions;

pub const DEFAULT_EXCHANGE_TYPE: &str = "topic";
pub const DEFAULT_MESSAGE_SIZE: usize = 300;
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 5000;

/// Ordered list of steps run once per virtual-user iteration
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub flow: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    PublishMessage(PublishParams),
    Subscribe(SubscribeParams),
}

impl Step {
    /// Key the step is declared under in a flow
    pub fn name(&self) -> &'static str {
        match self {
            Step::PublishMessage(_) => "publishMessage",
            Step::Subscribe(_) => "subscribe",
        }
    }
}

/// Parameters of a publish step. String fields may contain template placeholders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishParams {
    /// Empty means the broker's default exchange
    #[serde(default)]
    pub exchange: String,
    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,
    /// Falls back to the queue name
    #[serde(default)]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    /// Literal string or structured payload; absent means a generated one
    #[serde(default)]
    pub data: Option<Value>,
    /// Size of the generated payload
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default)]
    pub options: PublishOptions,
    #[serde(default = "default_batch")]
    pub batch: i64,
}

/// Parameters of a subscribe step
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    #[serde(default)]
    pub queue: Option<String>,
    /// Milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_message_count")]
    pub message_count: u64,
}

fn default_exchange_type() -> String {
    DEFAULT_EXCHANGE_TYPE.to_string()
}

fn default_size() -> usize {
    DEFAULT_MESSAGE_SIZE
}

fn default_batch() -> i64 {
    1
}

fn default_timeout() -> u64 {
    DEFAULT_SUBSCRIBE_TIMEOUT_MS
}

fn default_message_count() -> u64 {
    1
}

impl PublishParams {
    /// Publish `data` to `queue` through the default exchange
    pub fn to_queue(queue: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            exchange: String::new(),
            exchange_type: default_exchange_type(),
            routing_key: None,
            queue: Some(queue.into()),
            data: Some(data.into()),
            size: DEFAULT_MESSAGE_SIZE,
            options: PublishOptions::default(),
            batch: 1,
        }
    }
}

impl SubscribeParams {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            timeout: DEFAULT_SUBSCRIBE_TIMEOUT_MS,
            message_count: 1,
        }
    }
}

/// Per virtual-user state threaded through every step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Correlation id attached to response telemetry
    #[serde(rename = "_uid")]
    pub uid: String,
    /// Template variable bindings
    #[serde(default)]
    pub vars: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_uid(Uuid::new_v4().to_string())
    }

    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            vars: Map::new(),
        }
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
