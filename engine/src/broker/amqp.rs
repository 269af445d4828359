//! AMQP 0-9-1 broker client backed by lapin

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::tcp::{OwnedIdentity, OwnedTLSConfig};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::options::{ConnectionOptions, TlsMaterial};
use super::service::{Broker, BrokerChannel, BrokerConnection};
use super::types::{
    BrokerError, ConnectionEvent, ConnectionEventHandler, Consumer, Delivery, PublishOptions,
};

/// `connectionOptions` keys understood by the AMQP URI, with their query names
const URI_PARAMS: &[(&str, &str)] = &[
    ("heartbeat", "heartbeat"),
    ("frameMax", "frame_max"),
    ("channelMax", "channel_max"),
    ("connectionTimeout", "connection_timeout"),
];

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::new(err.to_string())
    }
}

/// Broker client for RabbitMQ and other AMQP 0-9-1 brokers
#[derive(Debug, Default, Clone, Copy)]
pub struct LapinBroker;

impl LapinBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let uri = uri_with_params(url, &options.params);
        let properties = ConnectionProperties::default();

        let connection = match &options.tls {
            Some(tls) => Connection::connect_with_config(&uri, properties, tls_config(tls)).await?,
            None => Connection::connect(&uri, properties).await?,
        };

        Ok(Arc::new(LapinConnection { inner: connection }))
    }
}

struct LapinConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = self.inner.create_channel().await?;
        debug!("Opened channel {}", channel.id());
        Ok(Arc::new(LapinChannel { inner: channel }))
    }

    fn on_event(&self, handler: ConnectionEventHandler) {
        self.inner.on_error(move |err| {
            handler(ConnectionEvent::Error(err.to_string()));
            // lapin reports connection loss through this hook only
            handler(ConnectionEvent::Closed);
        });
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close(200, "OK").await?;
        Ok(())
    }
}

struct LapinChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn assert_exchange(
        &self,
        name: &str,
        kind: &str,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.inner
            .exchange_declare(
                name,
                exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn assert_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        self.inner
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> Result<(), BrokerError> {
        // The returned confirm is dropped: no per-message acknowledgement is awaited
        let _confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: options.mandatory,
                    ..Default::default()
                },
                &payload,
                properties(options),
            )
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        let tag = format!("amqp-scenario-{}", Uuid::new_v4());
        let consumer = self
            .inner
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let deliveries = consumer
            .map(|delivery| {
                delivery
                    .map(|d| Delivery {
                        delivery_tag: d.delivery_tag,
                        payload: Bytes::from(d.data),
                    })
                    .map_err(BrokerError::from)
            })
            .boxed();

        Ok(Consumer { tag, deliveries })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close(200, "OK").await?;
        Ok(())
    }
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

fn properties(options: &PublishOptions) -> BasicProperties {
    let mut props = BasicProperties::default();
    if options.persistent {
        props = props.with_delivery_mode(2);
    }
    if let Some(content_type) = &options.content_type {
        props = props.with_content_type(ShortString::from(content_type.clone()));
    }
    if let Some(priority) = options.priority {
        props = props.with_priority(priority);
    }
    if let Some(expiration) = &options.expiration {
        props = props.with_expiration(ShortString::from(expiration.clone()));
    }
    if let Some(message_id) = &options.message_id {
        props = props.with_message_id(ShortString::from(message_id.clone()));
    }
    if let Some(correlation_id) = &options.correlation_id {
        props = props.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(app_id) = &options.app_id {
        props = props.with_app_id(ShortString::from(app_id.clone()));
    }
    if !options.headers.is_empty() {
        let mut headers = FieldTable::default();
        for (name, value) in &options.headers {
            headers.insert(
                ShortString::from(name.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }
        props = props.with_headers(headers);
    }
    props
}

fn tls_config(tls: &TlsMaterial) -> OwnedTLSConfig {
    if tls.key.is_some() {
        warn!("ssl.key is ignored: supply the client identity as a PKCS#12 bundle in ssl.cert");
    }
    if tls.reject_unauthorized == Some(false) {
        warn!("ssl.rejectUnauthorized=false is not supported, the broker certificate is always verified");
    }

    let identity = tls.cert.as_ref().map(|der| OwnedIdentity {
        der: der.clone(),
        password: tls.passphrase.clone().unwrap_or_default(),
    });
    let cert_chain = (!tls.ca.is_empty()).then(|| {
        tls.ca
            .iter()
            .map(|pem| String::from_utf8_lossy(pem).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    });

    OwnedTLSConfig {
        identity,
        cert_chain,
    }
}

/// Append recognised connection options to the URI query
fn uri_with_params(url: &str, params: &Map<String, Value>) -> String {
    let mut query = Vec::new();
    for (key, value) in params {
        match URI_PARAMS.iter().find(|(name, _)| name == key) {
            Some((_, uri_key)) => {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                query.push(format!("{}={}", uri_key, value));
            }
            None => debug!("Ignoring connection option {}", key),
        }
    }

    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query.join("&"))
}
