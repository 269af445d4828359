//! Scenario step executor

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::types::{Context, ScenarioSpec, Step};
use crate::broker::{Broker, BrokerChannel};
use crate::config::EngineConfig;
use crate::connection::ConnectionManager;
use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::ops::{Subscription, publish, subscribe};
use crate::template::Template;

/// Entry point for the host runtime.
///
/// One engine owns one [`ConnectionManager`]; every scenario created from it shares
/// that connection.
pub struct Engine {
    connections: Arc<ConnectionManager>,
    template: Arc<dyn Template>,
    sink: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        broker: Arc<dyn Broker>,
        template: Arc<dyn Template>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(config, broker, Arc::clone(&sink)));
        Self {
            connections,
            template,
            sink,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Build a reusable scenario from its definition
    pub fn create_scenario(&self, spec: ScenarioSpec) -> Scenario {
        Scenario {
            spec: Arc::new(spec),
            connections: Arc::clone(&self.connections),
            template: Arc::clone(&self.template),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Release the broker connection. Never fails.
    pub async fn cleanup(&self) {
        self.connections.cleanup().await;
    }
}

/// Result of one scenario invocation
#[derive(Debug)]
pub struct ScenarioRun {
    /// The context passed in, handed back
    pub context: Context,
    pub result: Result<(), EngineError>,
    /// Consumers still draining in the background
    pub subscriptions: Vec<Subscription>,
}

/// A scenario bound to an engine, invocable concurrently any number of times
#[derive(Clone)]
pub struct Scenario {
    spec: Arc<ScenarioSpec>,
    connections: Arc<ConnectionManager>,
    template: Arc<dyn Template>,
    sink: Arc<dyn EventSink>,
}

impl Scenario {
    pub fn name(&self) -> Option<&str> {
        self.spec.name.as_deref()
    }

    /// Run every step in declared order against `context`
    pub async fn run(&self, context: Context) -> ScenarioRun {
        let started_at = Instant::now();
        self.sink.emit(Event::Started);

        let mut subscriptions = Vec::new();
        let result = self.run_steps(&context, &mut subscriptions).await;

        match &result {
            Ok(()) => {
                debug!(
                    "Scenario {} completed in {:?}",
                    self.name().unwrap_or("<unnamed>"),
                    started_at.elapsed()
                );
                self.sink.emit(Event::Done);
            }
            Err(e) => {
                info!(
                    "Scenario {} failed: {}",
                    self.name().unwrap_or("<unnamed>"),
                    e
                );
                self.sink.emit(Event::Error {
                    message: e.message(),
                });
            }
        }

        ScenarioRun {
            context,
            result,
            subscriptions,
        }
    }

    /// Run on a background task and report through `callback` when the steps finish.
    ///
    /// The task then stays alive while its consumers drain; aborting it stops them.
    pub fn spawn<F>(&self, context: Context, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), EngineError>, Context) + Send + 'static,
    {
        let scenario = self.clone();
        tokio::spawn(async move {
            let run = scenario.run(context).await;
            callback(run.result, run.context);
            for subscription in run.subscriptions {
                subscription.wait().await;
            }
        })
    }

    async fn run_steps(
        &self,
        context: &Context,
        subscriptions: &mut Vec<Subscription>,
    ) -> Result<(), EngineError> {
        let session = self.connections.ensure_connected().await?;
        let config = self.connections.config();
        let channel: Arc<dyn BrokerChannel> =
            Arc::new(session.open_channel(config.channel_strategy).await?);

        for (index, step) in self.spec.flow.iter().enumerate() {
            debug!("Running step {} ({})", index, step.name());
            match step {
                Step::PublishMessage(params) => {
                    publish(
                        channel.as_ref(),
                        params,
                        context,
                        self.template.as_ref(),
                        self.sink.as_ref(),
                    )
                    .await?
                }
                Step::Subscribe(params) => {
                    let subscription = subscribe(
                        Arc::clone(&channel),
                        params,
                        context,
                        self.template.as_ref(),
                        Arc::clone(&self.sink),
                        config.subscribe_timeout,
                    )
                    .await?;
                    subscriptions.push(subscription);
                }
            }
        }

        Ok(())
    }
}
