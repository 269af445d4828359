//! Common Test Utilities for Integration Tests
//!
//! A recording in-memory broker and an event sink shared across integration test modules.

#![allow(dead_code)]

use amqp_scenario_engine::broker::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, ConnectionEvent,
    ConnectionEventHandler, ConnectionOptions, Consumer, Delivery, PublishOptions,
};
use amqp_scenario_engine::events::{Event, EventSink};
use amqp_scenario_engine::{Engine, EngineConfig, ScenarioSpec, Verbatim};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Every broker interaction the mock observed, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect { url: String },
    CreateChannel,
    AssertExchange { name: String, kind: String, durable: bool },
    AssertQueue { name: String, durable: bool },
    BindQueue { queue: String, exchange: String, routing_key: String },
    Publish { exchange: String, routing_key: String, payload: Bytes },
    Consume { queue: String },
    Ack { delivery_tag: u64 },
    Cancel { consumer_tag: String },
    CloseChannel,
    CloseConnection,
}

/// Broker operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    CreateChannel,
    AssertExchange,
    AssertQueue,
    BindQueue,
    Publish,
    Consume,
    CloseChannel,
    CloseConnection,
}

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, BrokerError>>;

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    failures: HashMap<Op, BrokerError>,
    preloaded: Vec<Bytes>,
    consumers: HashMap<String, DeliverySender>,
    handlers: Vec<ConnectionEventHandler>,
    next_delivery_tag: u64,
    next_consumer: u64,
    connect_delay: Option<Duration>,
}

/// In-memory broker recording every call
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `op` fail with `error`
    pub fn fail(&self, op: Op, error: BrokerError) {
        self.state.lock().unwrap().failures.insert(op, error);
    }

    /// Slow down connects so concurrent callers overlap
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = Some(delay);
    }

    /// Messages handed to the next registered consumer as soon as it starts
    pub fn preload(&self, payloads: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .preloaded
            .extend(payloads.iter().map(|p| Bytes::from(p.to_string())));
    }

    /// Push a message to every active consumer
    pub fn deliver(&self, payload: &str) {
        let mut state = self.state.lock().unwrap();
        let senders: Vec<DeliverySender> = state.consumers.values().cloned().collect();
        for sender in senders {
            state.next_delivery_tag += 1;
            let _ = sender.send(Ok(Delivery {
                delivery_tag: state.next_delivery_tag,
                payload: Bytes::from(payload.to_string()),
            }));
        }
    }

    /// Fire a connection event on the most recent connection
    pub fn fire(&self, event: ConnectionEvent) {
        let handler = self.state.lock().unwrap().handlers.last().cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|&c| predicate(c)).count()
    }

    pub fn connects(&self) -> usize {
        self.count(|c| matches!(c, Call::Connect { .. }))
    }

    pub fn publishes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Publish { .. }))
            .collect()
    }

    pub fn active_consumers(&self) -> usize {
        self.state.lock().unwrap().consumers.len()
    }

    fn record(&self, call: Call, op: Option<Op>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match op.and_then(|op| state.failures.get(&op)) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(
        &self,
        url: &str,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let delay = self.state.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(
            Call::Connect {
                url: url.to_string(),
            },
            Some(Op::Connect),
        )?;
        Ok(Arc::new(MockConnection {
            broker: self.clone(),
        }))
    }
}

struct MockConnection {
    broker: MockBroker,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        self.broker
            .record(Call::CreateChannel, Some(Op::CreateChannel))?;
        Ok(Arc::new(MockChannel {
            broker: self.broker.clone(),
        }))
    }

    fn on_event(&self, handler: ConnectionEventHandler) {
        self.broker.state.lock().unwrap().handlers.push(handler);
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker
            .record(Call::CloseConnection, Some(Op::CloseConnection))
    }
}

struct MockChannel {
    broker: MockBroker,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn assert_exchange(
        &self,
        name: &str,
        kind: &str,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.broker.record(
            Call::AssertExchange {
                name: name.to_string(),
                kind: kind.to_string(),
                durable,
            },
            Some(Op::AssertExchange),
        )
    }

    async fn assert_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        self.broker.record(
            Call::AssertQueue {
                name: name.to_string(),
                durable,
            },
            Some(Op::AssertQueue),
        )
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.broker.record(
            Call::BindQueue {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            },
            Some(Op::BindQueue),
        )
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        _options: &PublishOptions,
    ) -> Result<(), BrokerError> {
        self.broker.record(
            Call::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload,
            },
            Some(Op::Publish),
        )
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        self.broker.record(
            Call::Consume {
                queue: queue.to_string(),
            },
            Some(Op::Consume),
        )?;

        let (tx, rx) = mpsc::unbounded_channel();
        let tag = {
            let mut state = self.broker.state.lock().unwrap();
            state.next_consumer += 1;
            let tag = format!("mock-consumer-{}", state.next_consumer);
            for payload in std::mem::take(&mut state.preloaded) {
                state.next_delivery_tag += 1;
                let _ = tx.send(Ok(Delivery {
                    delivery_tag: state.next_delivery_tag,
                    payload,
                }));
            }
            state.consumers.insert(tag.clone(), tx);
            tag
        };

        let deliveries = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(Consumer { tag, deliveries })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.broker.record(Call::Ack { delivery_tag }, None)
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.broker.state.lock().unwrap().consumers.remove(consumer_tag);
        self.broker.record(
            Call::Cancel {
                consumer_tag: consumer_tag.to_string(),
            },
            None,
        )
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.record(Call::CloseChannel, Some(Op::CloseChannel))
    }
}

/// Sink keeping every event in emission order
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }

    /// Values of every counter event named `name`
    pub fn counters(&self, name: &str) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Counter { name: n, value } if n == name => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Engine wired to a mock broker, a recording sink and no templating
pub fn create_test_engine(config: EngineConfig) -> (Engine, MockBroker, Arc<RecordingSink>) {
    let broker = MockBroker::new();
    let sink = RecordingSink::new();
    let engine = Engine::new(
        config,
        Arc::new(broker.clone()),
        Arc::new(Verbatim),
        sink.clone(),
    );
    (engine, broker, sink)
}

pub fn scenario_spec(value: serde_json::Value) -> ScenarioSpec {
    serde_json::from_value(value).expect("valid scenario")
}

/// Poll `condition` until it holds or one second passes
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Initialize test logging (call at start of tests that need logging)
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amqp_scenario_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
