//! Scenario definitions and execution

mod executor;
mod types;

pub use executor::{Engine, Scenario, ScenarioRun};
pub use types::{
    Context, DEFAULT_EXCHANGE_TYPE, DEFAULT_MESSAGE_SIZE, DEFAULT_SUBSCRIBE_TIMEOUT_MS,
    PublishParams, ScenarioSpec, Step, SubscribeParams,
};
