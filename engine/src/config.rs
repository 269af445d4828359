//! Engine configuration
//!
//! Configuration comes either from the `amqp` section of a script (JSON) or from
//! environment variables via [`EngineConfig::from_env`].

use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_URL: &str = "amqp://localhost:5672";

/// Main engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Broker URL
    #[serde(default = "default_url", alias = "target")]
    pub url: String,

    /// Opaque connection options passed to the broker client
    #[serde(default)]
    pub connection_options: Map<String, Value>,

    /// TLS material (file paths are read at connect time)
    #[serde(default)]
    pub ssl: Option<SslConfig>,

    /// How scenario invocations obtain a channel
    #[serde(default)]
    pub channel_strategy: ChannelStrategy,

    /// What a subscribe timeout does
    #[serde(default)]
    pub subscribe_timeout: TimeoutPolicy,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca: Option<CaPaths>,
    pub passphrase: Option<String>,
    pub reject_unauthorized: Option<bool>,
}

/// `ssl.ca` accepts a single path or a list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CaPaths {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStrategy {
    /// One channel per scenario invocation over the shared connection
    #[default]
    PerScenario,
    /// The manager's single channel, with every call serialized
    Shared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Log that the target count was not reached and keep consuming
    #[default]
    Log,
    /// Cancel the consumer when the timeout fires
    Cancel,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connection_options: Map::new(),
            ssl: None,
            channel_strategy: ChannelStrategy::default(),
            subscribe_timeout: TimeoutPolicy::default(),
        }
    }
}

impl SslConfig {
    pub fn ca_paths(&self) -> &[PathBuf] {
        match &self.ca {
            Some(CaPaths::One(path)) => std::slice::from_ref(path),
            Some(CaPaths::Many(paths)) => paths,
            None => &[],
        }
    }

    fn is_empty(&self) -> bool {
        self.cert.is_none()
            && self.key.is_none()
            && self.ca.is_none()
            && self.passphrase.is_none()
            && self.reject_unauthorized.is_none()
    }
}

impl ChannelStrategy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "per_scenario" | "per-scenario" => Some(Self::PerScenario),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

impl TimeoutPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "log" => Some(Self::Log),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl EngineConfig {
    /// Parse the `amqp` section of a script
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("AMQP_URL")
            && !url.is_empty()
        {
            config.url = url;
        }

        // TLS config
        let mut ssl = SslConfig::default();
        if let Ok(path) = env::var("AMQP_SSL_CERT")
            && !path.is_empty()
        {
            ssl.cert = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var("AMQP_SSL_KEY")
            && !path.is_empty()
        {
            ssl.key = Some(PathBuf::from(path));
        }
        if let Ok(paths) = env::var("AMQP_SSL_CA") {
            let paths: Vec<PathBuf> = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
            if !paths.is_empty() {
                ssl.ca = Some(CaPaths::Many(paths));
            }
        }
        if let Ok(passphrase) = env::var("AMQP_SSL_PASSPHRASE")
            && !passphrase.is_empty()
        {
            ssl.passphrase = Some(passphrase);
        }
        if let Ok(val) = env::var("AMQP_SSL_REJECT_UNAUTHORIZED") {
            ssl.reject_unauthorized = Some(val.to_lowercase() == "true" || val == "1");
        }
        if !ssl.is_empty() {
            config.ssl = Some(ssl);
        }

        // Engine behaviour
        if let Ok(val) = env::var("AMQP_CHANNEL_STRATEGY")
            && let Some(strategy) = ChannelStrategy::parse(&val)
        {
            config.channel_strategy = strategy;
        }
        if let Ok(val) = env::var("AMQP_SUBSCRIBE_TIMEOUT")
            && let Some(policy) = TimeoutPolicy::parse(&val)
        {
            config.subscribe_timeout = policy;
        }

        config
    }
}
