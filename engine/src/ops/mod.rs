//! Step operations

mod message;
mod publish;
mod subscribe;

pub use message::{generate_message, generate_message_with};
pub use publish::{Payload, Route, publish, resolve_payload, resolve_route};
pub use subscribe::{DrainReport, Subscription, SubscriptionOutcome, drain, subscribe};
