// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Transport
//!
//! This module holds the seam between the client and the wire protocol. The
//! `AmqpConnector`, `AmqpConnection` and `AmqpChannel` traits describe the
//! connection and channel primitives the client drives; the `Lapin*` types
//! implement them on top of lapin. Connection and channel failures are
//! reported as `LinkEvent`s on the receiver returned by `connect`, which the
//! reconnect state machine drops to stop listening.

use crate::{
    codec,
    configs::{BrokerSettings, CredentialsLookup},
    errors::{AmqpError, ConnectFailure},
    exchange::ExchangeKind,
    message::{MessageProperties, RawDelivery},
    queue::{QueueBinding, QueueSpec},
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions, QueueDeleteOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

/// Heartbeat negotiated with the broker, in seconds.
pub const HEARTBEAT_SECS: u16 = 2;

const REPLY_SUCCESS: u16 = 200;

/// Lifecycle notification raised by a connection or its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectionError(String),
    /// The connection went away; `error` is set when it closed abnormally.
    ConnectionClosed { error: Option<String> },
    ChannelError(String),
}

/// Receiving side of the connection and channel listeners.
pub type LinkEvents = UnboundedReceiver<LinkEvent>;

/// Stream of deliveries from a consumer.
pub type DeliveryStream = BoxStream<'static, Result<RawDelivery, AmqpError>>;

/// Channel level primitives used by the client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn basic_qos(&self, prefetch: u16) -> Result<(), AmqpError>;

    async fn exchange_declare(
        &self,
        name: &str,
        kind: &ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError>;

    /// Declares a queue and returns the name the broker resolved.
    async fn queue_declare(&self, spec: &QueueSpec) -> Result<String, AmqpError>;

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn queue_unbind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn queue_delete(&self, queue: &str) -> Result<(), AmqpError>;

    async fn basic_consume(&self, queue: &str, no_ack: bool) -> Result<DeliveryStream, AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError>;

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError>;

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Opens broker connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    async fn connect(&self, uri: &str)
        -> Result<(Arc<dyn AmqpConnection>, LinkEvents), AmqpError>;
}

/// Builds `amqp[s]://user:pass@host:port/vhost` for the broker. Credentials
/// are percent-encoded.
pub fn broker_url(
    broker: &BrokerSettings,
    lookup: &dyn CredentialsLookup,
) -> Result<String, AmqpError> {
    let credentials = if broker.credentials_from_settings {
        lookup.credentials()
    } else {
        broker.credentials.clone()
    };
    let protocol = if broker.tls { "amqps" } else { "amqp" };

    let mut url = Url::parse(&format!(
        "{}://{}:{}/{}",
        protocol, broker.host, broker.port, broker.vhost
    ))
    .map_err(|err| AmqpError::InvalidConfig(format!("broker address: {err}")))?;

    url.set_username(&credentials.username)
        .and_then(|_| url.set_password(Some(&credentials.password)))
        .map_err(|_| AmqpError::InvalidConfig("broker credentials".to_owned()))?;

    Ok(url.to_string())
}

/// Classifies a lapin failure for the reconnect policy.
pub fn classify(err: &lapin::Error) -> ConnectFailure {
    match err {
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED)) =>
        {
            ConnectFailure::InvalidLogin
        }
        lapin::Error::IOError(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectFailure::ConnectionRefused
        }
        _ => ConnectFailure::Other,
    }
}

/// Connects through lapin.
#[derive(Debug, Clone, Default)]
pub struct LapinConnector {
    connection_name: String,
}

impl LapinConnector {
    pub fn new(connection_name: &str) -> Self {
        LapinConnector {
            connection_name: connection_name.to_owned(),
        }
    }
}

#[async_trait]
impl AmqpConnector for LapinConnector {
    async fn connect(
        &self,
        uri: &str,
    ) -> Result<(Arc<dyn AmqpConnection>, LinkEvents), AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        let separator = if uri.contains('?') { '&' } else { '?' };
        let uri = format!("{uri}{separator}heartbeat={HEARTBEAT_SECS}");

        let conn = match Connection::connect(&uri, options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(classify(&err), err.to_string()))
            }
        }?;
        debug!("amqp connected");

        let (events, rx) = mpsc::unbounded_channel();
        let listener = events.clone();
        conn.on_error(move |err| {
            // A dead connection surfaces as an error followed by a close.
            let _ = listener.send(LinkEvent::ConnectionError(err.to_string()));
            let _ = listener.send(LinkEvent::ConnectionClosed {
                error: Some(err.to_string()),
            });
        });

        Ok((Arc::new(LapinConnection { conn, events }), rx))
    }
}

pub struct LapinConnection {
    conn: Connection,
    events: UnboundedSender<LinkEvent>,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(channel) => {
                let listener = self.events.clone();
                channel.on_error(move |err| {
                    let _ = listener.send(LinkEvent::ChannelError(err.to_string()));
                });
                debug!("channel created");
                Ok(Arc::new(LapinChannel { channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.conn
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn basic_qos(&self, prefetch: u16) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
            .map_err(|err| AmqpError::QoSDeclarationError(err.to_string()))
    }

    async fn exchange_declare(
        &self,
        name: &str,
        kind: &ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                name,
                kind.clone().try_into()?,
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(format!("{name}: {err}")))
    }

    async fn queue_declare(&self, spec: &QueueSpec) -> Result<String, AmqpError> {
        self.channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: spec.durable,
                    exclusive: spec.exclusive,
                    auto_delete: spec.auto_delete,
                    nowait: false,
                },
                codec::field_table(&spec.arguments()),
            )
            .await
            .map(|queue| queue.name().to_string())
            .map_err(|err| AmqpError::DeclareQueueError(format!("{}: {err}", spec.name)))
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                codec::field_table(&binding.arguments),
            )
            .await
            .map_err(|_| {
                AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                )
            })
    }

    async fn queue_unbind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.channel
            .queue_unbind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                codec::field_table(&binding.arguments),
            )
            .await
            .map_err(|_| {
                AmqpError::UnbindingError(binding.exchange_name.clone(), binding.queue_name.clone())
            })
    }

    async fn queue_delete(&self, queue: &str) -> Result<(), AmqpError> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::DeleteQueueError(format!("{queue}: {err}")))
    }

    async fn basic_consume(&self, queue: &str, no_ack: bool) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("amqp-flow-{}", Uuid::new_v4()),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::ConsumerDeclarationError(queue.to_owned())
            })?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(RawDelivery {
                    delivery_tag: delivery.delivery_tag,
                    exchange: delivery.exchange.to_string(),
                    routing_key: delivery.routing_key.to_string(),
                    redelivered: delivery.redelivered,
                    properties: codec::message_properties(&delivery.properties),
                    data: delivery.data,
                }),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                body,
                codec::basic_properties(properties),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
            .map_err(|_| AmqpError::AckMessageError)
    }

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
            .map_err(|_| AmqpError::NackMessageError)
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| AmqpError::RejectMessageError)
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}
