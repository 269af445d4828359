//! Publish operation

use std::time::Instant;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use super::message::generate_message;
use crate::broker::{BrokerChannel, BrokerError};
use crate::error::EngineError;
use crate::events::{Event, EventSink, MESSAGES_SENT, PUBLISH_TIME, millis};
use crate::scenario::{Context, PublishParams};
use crate::template::Template;

/// Payload after template resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    /// Bytes put on the wire. Structured payloads are sent as compact JSON.
    pub fn to_bytes(&self) -> Result<Bytes, EngineError> {
        match self {
            Payload::Text(text) => Ok(Bytes::from(text.clone())),
            Payload::Structured(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| EngineError::Publish(BrokerError::new(e.to_string()))),
        }
    }
}

/// Resolve the step's payload against the context.
///
/// Structured payloads are rendered as JSON text, interpolated as a whole and parsed
/// back, so placeholders may sit anywhere inside nested fields.
pub fn resolve_payload(
    params: &PublishParams,
    context: &Context,
    template: &dyn Template,
) -> Result<Payload, EngineError> {
    match params.data.as_ref().filter(|data| !is_blank(data)) {
        None => Ok(Payload::Text(generate_message(params.size))),
        Some(Value::String(text)) => Ok(Payload::Text(template.render(text, context))),
        Some(value) => {
            let text = serde_json::to_string(value).map_err(|e| {
                EngineError::InvalidArgument(format!("Payload is not serializable: {}", e))
            })?;
            let rendered = template.render(&text, context);
            let value = serde_json::from_str(&rendered).map_err(|e| {
                EngineError::InvalidArgument(format!(
                    "Payload is not valid JSON after templating: {}",
                    e
                ))
            })?;
            Ok(Payload::Structured(value))
        }
    }
}

/// `null`, `false`, zero and the empty string all ask for a generated payload
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Interpolated routing targets of a publish step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub exchange: String,
    pub routing_key: String,
    pub queue: Option<String>,
}

pub fn resolve_route(params: &PublishParams, context: &Context, template: &dyn Template) -> Route {
    let exchange = template.render(&params.exchange, context);
    let routing_key = params
        .routing_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .or(params.queue.as_deref())
        .map(|key| template.render(key, context))
        .unwrap_or_default();
    let queue = params
        .queue
        .as_deref()
        .map(|queue| template.render(queue, context))
        .filter(|queue| !queue.is_empty());

    Route {
        exchange,
        routing_key,
        queue,
    }
}

/// Run one publish step and emit its telemetry
pub async fn publish(
    channel: &dyn BrokerChannel,
    params: &PublishParams,
    context: &Context,
    template: &dyn Template,
    sink: &dyn EventSink,
) -> Result<(), EngineError> {
    let started_at = Instant::now();

    match publish_messages(channel, params, context, template).await {
        Ok(route) => {
            let elapsed = started_at.elapsed();
            sink.emit(Event::Counter {
                name: MESSAGES_SENT,
                value: params.batch,
            });
            sink.emit(Event::Histogram {
                name: PUBLISH_TIME,
                value: millis(elapsed),
            });
            sink.emit(Event::Response {
                latency: elapsed,
                status: 0,
                correlation_id: context.uid.clone(),
            });
            debug!(
                "Published {} message(s) to {}/{}",
                params.batch,
                if route.exchange.is_empty() {
                    "default"
                } else {
                    route.exchange.as_str()
                },
                route.routing_key
            );
            Ok(())
        }
        Err(e) => {
            debug!("Publish error: {}", e);
            sink.emit(Event::Error {
                message: e.message(),
            });
            sink.emit(Event::Response {
                latency: started_at.elapsed(),
                status: e.status_code(),
                correlation_id: context.uid.clone(),
            });
            Err(e)
        }
    }
}

async fn publish_messages(
    channel: &dyn BrokerChannel,
    params: &PublishParams,
    context: &Context,
    template: &dyn Template,
) -> Result<Route, EngineError> {
    let route = resolve_route(params, context, template);
    let payload = resolve_payload(params, context, template)?;

    // Topology first, each assertion settled before the next
    if !route.exchange.is_empty() {
        channel
            .assert_exchange(&route.exchange, &params.exchange_type, true)
            .await
            .map_err(EngineError::Topology)?;
    }
    if let Some(queue) = &route.queue {
        channel
            .assert_queue(queue, true)
            .await
            .map_err(EngineError::Topology)?;
        if !route.exchange.is_empty() {
            channel
                .bind_queue(queue, &route.exchange, &route.routing_key)
                .await
                .map_err(EngineError::Topology)?;
        }
    }

    let body = payload.to_bytes()?;
    for _ in 0..params.batch.max(0) {
        channel
            .publish(&route.exchange, &route.routing_key, body.clone(), &params.options)
            .await
            .map_err(EngineError::Publish)?;
    }

    Ok(route)
}
