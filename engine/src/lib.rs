//! AMQP Scenario Engine Library
//!
//! Runs load-test scenarios (ordered publish and subscribe steps) against an AMQP
//! broker. The host drives iterations through [`Engine`] and [`Scenario`]; the engine
//! reports progress through an [`EventSink`].

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod ops;
pub mod scenario;
pub mod template;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use broker::{Broker, LapinBroker};
pub use config::{ChannelStrategy, EngineConfig, TimeoutPolicy};
pub use connection::ConnectionManager;
pub use error::EngineError;
pub use events::{ChannelSink, Event, EventSink, MetricsSink};
pub use scenario::{Context, Engine, Scenario, ScenarioRun, ScenarioSpec, Step};
pub use template::{Placeholders, Template, Verbatim};
