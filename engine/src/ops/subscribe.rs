//! Subscribe operation
//!
//! The step resolves as soon as the broker accepts the consumer. Deliveries are then
//! drained by a background task that acks each message, emits telemetry and cancels
//! the consumer once the target count is reached. The task is exposed as a
//! [`Subscription`] handle the caller may await.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{BrokerChannel, Consumer};
use crate::config::TimeoutPolicy;
use crate::error::EngineError;
use crate::events::{Event, EventSink, MESSAGES_RECEIVED, SUBSCRIBE_TIME, millis};
use crate::scenario::{Context, SubscribeParams};
use crate::template::Template;

/// How a subscription's background task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// Target message count reached and the consumer cancelled
    Completed { received: u64 },
    /// Timeout fired under [`TimeoutPolicy::Cancel`]
    TimedOut { received: u64 },
    /// The broker closed the delivery stream
    Ended { received: u64 },
    Failed { received: u64, message: String },
}

impl SubscriptionOutcome {
    pub fn received(&self) -> u64 {
        match self {
            SubscriptionOutcome::Completed { received }
            | SubscriptionOutcome::TimedOut { received }
            | SubscriptionOutcome::Ended { received }
            | SubscriptionOutcome::Failed { received, .. } => *received,
        }
    }
}

/// Handle to a registered consumer draining in the background.
///
/// Under [`TimeoutPolicy::Log`] the task has no end of its own short of the target
/// count, so dropping the handle aborts it and releases the channel it holds.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    consumer_tag: String,
    handle: JoinHandle<SubscriptionOutcome>,
    abort_on_drop: bool,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the background task to end
    pub async fn wait(mut self) -> SubscriptionOutcome {
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) => SubscriptionOutcome::Failed {
                received: 0,
                message: e.to_string(),
            },
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.abort_on_drop && !self.handle.is_finished() {
            debug!("Stopping consumer {} on {}", self.consumer_tag, self.queue);
            self.handle.abort();
        }
    }
}

/// Totals from [`drain`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub received: u64,
    /// Consumers that had not finished by the deadline
    pub pending: u64,
}

/// Wait for every subscription under one shared `timeout`.
///
/// Handles still running at the deadline are dropped.
pub async fn drain(subscriptions: Vec<Subscription>, timeout: Duration) -> DrainReport {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut report = DrainReport::default();
    for subscription in subscriptions {
        let queue = subscription.queue.clone();
        match tokio::time::timeout_at(deadline, subscription.wait()).await {
            Ok(outcome) => report.received += outcome.received(),
            Err(_) => {
                warn!("Consumer on {} still waiting for messages", queue);
                report.pending += 1;
            }
        }
    }
    report
}

/// Run one subscribe step
pub async fn subscribe(
    channel: Arc<dyn BrokerChannel>,
    params: &SubscribeParams,
    context: &Context,
    template: &dyn Template,
    sink: Arc<dyn EventSink>,
    policy: TimeoutPolicy,
) -> Result<Subscription, EngineError> {
    let started_at = Instant::now();

    let (queue, consumer) = match register(channel.as_ref(), params, context, template).await {
        Ok(registered) => registered,
        Err(e) => {
            debug!("Subscribe error: {}", e);
            sink.emit(Event::Error {
                message: e.message(),
            });
            return Err(e);
        }
    };
    debug!("Subscribed to queue: {}", queue);

    let consumer_tag = consumer.tag.clone();
    let drain = Drain {
        channel,
        queue: queue.clone(),
        target: params.message_count,
        timeout: Duration::from_millis(params.timeout),
        policy,
        started_at,
        sink,
    };
    let handle = tokio::spawn(drain.run(consumer));

    Ok(Subscription {
        queue,
        consumer_tag,
        handle,
        abort_on_drop: policy == TimeoutPolicy::Log,
    })
}

async fn register(
    channel: &dyn BrokerChannel,
    params: &SubscribeParams,
    context: &Context,
    template: &dyn Template,
) -> Result<(String, Consumer), EngineError> {
    let queue = params
        .queue
        .as_deref()
        .map(|queue| template.render(queue, context))
        .unwrap_or_default();
    if queue.is_empty() {
        return Err(EngineError::InvalidArgument(
            "Queue name is required for subscribe".to_string(),
        ));
    }

    channel
        .assert_queue(&queue, true)
        .await
        .map_err(EngineError::Topology)?;
    let consumer = channel
        .consume(&queue)
        .await
        .map_err(EngineError::Subscribe)?;

    Ok((queue, consumer))
}

struct Drain {
    channel: Arc<dyn BrokerChannel>,
    queue: String,
    target: u64,
    timeout: Duration,
    policy: TimeoutPolicy,
    started_at: Instant,
    sink: Arc<dyn EventSink>,
}

impl Drain {
    async fn run(self, mut consumer: Consumer) -> SubscriptionOutcome {
        let mut received = 0u64;
        let timer = tokio::time::sleep(self.timeout);
        tokio::pin!(timer);
        let mut timer_armed = true;

        loop {
            tokio::select! {
                delivery = consumer.deliveries.next() => match delivery {
                    Some(Ok(delivery)) => {
                        received += 1;
                        if let Err(e) = self.channel.ack(delivery.delivery_tag).await {
                            warn!("Failed to ack delivery {} from {}: {}", delivery.delivery_tag, self.queue, e);
                            self.sink.emit(Event::Error { message: e.message });
                        }
                        self.sink.emit(Event::Counter {
                            name: MESSAGES_RECEIVED,
                            value: 1,
                        });
                        self.sink.emit(Event::Histogram {
                            name: SUBSCRIBE_TIME,
                            value: millis(self.started_at.elapsed()),
                        });

                        if received >= self.target {
                            self.cancel(&consumer.tag).await;
                            return SubscriptionOutcome::Completed { received };
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Consumer {} on {} failed: {}", consumer.tag, self.queue, e);
                        self.sink.emit(Event::Error { message: e.message.clone() });
                        return SubscriptionOutcome::Failed { received, message: e.message };
                    }
                    None => {
                        debug!("Consumer {} on {} closed by broker", consumer.tag, self.queue);
                        return SubscriptionOutcome::Ended { received };
                    }
                },
                _ = &mut timer, if timer_armed => {
                    timer_armed = false;
                    info!(
                        "Subscribe timeout after {}ms, received {} messages",
                        self.timeout.as_millis(),
                        received
                    );
                    if self.policy == TimeoutPolicy::Cancel {
                        self.cancel(&consumer.tag).await;
                        return SubscriptionOutcome::TimedOut { received };
                    }
                }
            }
        }
    }

    async fn cancel(&self, consumer_tag: &str) {
        if let Err(e) = self.channel.cancel(consumer_tag).await {
            warn!("Failed to cancel consumer {} on {}: {}", consumer_tag, self.queue, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_received() {
        assert_eq!(SubscriptionOutcome::Completed { received: 2 }.received(), 2);
        assert_eq!(
            SubscriptionOutcome::Failed {
                received: 1,
                message: "boom".into()
            }
            .received(),
            1
        );
    }
}
