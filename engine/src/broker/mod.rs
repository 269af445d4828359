//! Broker abstraction
//!
//! The engine talks to the message broker only through the traits in [`service`].
//! [`LapinBroker`] is the production implementation.

mod amqp;
mod options;
mod scoped;
mod service;
mod types;

pub use amqp::LapinBroker;
pub use options::{ConnectionOptions, REDACTED, TlsMaterial, redact_url};
pub use scoped::ScenarioChannel;
pub use service::{Broker, BrokerChannel, BrokerConnection};
pub use types::{
    BrokerError, ConnectionEvent, ConnectionEventHandler, Consumer, Delivery, PublishOptions,
};
