//! Telemetry events emitted by the engine
//!
//! The engine only ever writes to an [`EventSink`]; the host decides what to do with
//! the events. Two sinks ship with the crate:
//! - [`MetricsSink`] forwards counters and histograms to the `metrics` facade
//! - [`ChannelSink`] forwards every event over a tokio channel

use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::warn;

pub const MESSAGES_SENT: &str = "amqp.messages.sent";
pub const MESSAGES_RECEIVED: &str = "amqp.messages.received";
pub const PUBLISH_TIME: &str = "amqp.publish.time";
pub const SUBSCRIBE_TIME: &str = "amqp.subscribe.time";

/// Closed set of events the engine emits
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A scenario invocation started
    Started,
    /// A scenario invocation completed every step
    Done,
    Error {
        message: String,
    },
    Counter {
        name: &'static str,
        value: i64,
    },
    /// Value in milliseconds
    Histogram {
        name: &'static str,
        value: f64,
    },
    /// Per-operation response record
    Response {
        latency: Duration,
        status: u16,
        correlation_id: String,
    },
}

impl Event {
    /// Name the host runtime knows this event by
    pub fn name(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Done => "done",
            Event::Error { .. } => "error",
            Event::Counter { .. } => "counter",
            Event::Histogram { .. } => "histogram",
            Event::Response { .. } => "response",
        }
    }
}

/// Write-only destination for engine events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn emit(&self, event: Event) {
        self(event)
    }
}

/// Milliseconds as a histogram value
pub fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Forwards events to the global `metrics` recorder
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Started => counter!("amqp.scenarios.started").increment(1),
            Event::Done => counter!("amqp.scenarios.completed").increment(1),
            Event::Error { message } => {
                warn!("Engine error: {}", message);
                counter!("amqp.errors").increment(1);
            }
            Event::Counter { name, value } => {
                // Non-positive batch counts are reported to the host but never recorded
                if value > 0 {
                    counter!(name).increment(value as u64);
                }
            }
            Event::Histogram { name, value } => histogram!(name).record(value),
            Event::Response {
                latency, status, ..
            } => {
                histogram!("amqp.response.time").record(millis(latency));
                if status != 0 {
                    counter!("amqp.responses.failed", "status" => status.to_string())
                        .increment(1);
                }
            }
        }
    }
}

/// Forwards events to a receiver owned by the host
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // A dropped receiver means the host stopped listening
        let _ = self.tx.send(event);
    }
}
