// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Client
//!
//! This module provides `Amqp`, the client a node drives. It owns at most one
//! broker connection and one channel (the link), the main consumer's queue
//! handle and the runtime routing key. Connecting, channel creation and
//! teardown live here; consuming, publishing, RPC and acknowledgments are
//! implemented on the same type in their own modules.

use crate::{
    channel::{
        broker_url, AmqpChannel, AmqpConnection, AmqpConnector, LapinConnector, LinkEvent,
        LinkEvents,
    },
    configs::{BrokerSettings, ClientConfig, CredentialsLookup, EnvCredentials},
    errors::{AmqpError, ErrorLocation, ErrorReport},
    exchange::{parse_routing_keys, ExchangeSpec},
    host::{Host, NodeKind, NodeStatus},
    queue::bindings_for,
    topology::{AmqpTopology, Topology},
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, RwLock},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, warn};

/// Live connection and, once created, its channel.
pub(crate) struct Link {
    pub(crate) connection: Arc<dyn AmqpConnection>,
    pub(crate) channel: Option<Arc<dyn AmqpChannel>>,
}

pub struct Amqp {
    pub(crate) config: ClientConfig,
    pub(crate) kind: NodeKind,
    pub(crate) host: Arc<dyn Host>,
    broker: BrokerSettings,
    connector: Arc<dyn AmqpConnector>,
    credentials: Arc<dyn CredentialsLookup>,
    routing_key: RwLock<String>,
    link: RwLock<Option<Link>>,
    pub(crate) queue: RwLock<Option<String>>,
    pub(crate) consumers: Mutex<Vec<JoinHandle<()>>>,
    /// Outstanding RPC reply waiters; finished ones are reaped on each request.
    pub(crate) rpc_waiters: Mutex<JoinSet<()>>,
}

impl Amqp {
    /// Creates a client that connects through lapin and reads settings based
    /// credentials from the environment.
    pub fn new(config: ClientConfig, broker: BrokerSettings, host: Arc<dyn Host>) -> Amqp {
        Amqp {
            connector: Arc::new(LapinConnector::new(&config.name)),
            credentials: Arc::new(EnvCredentials),
            kind: NodeKind::default(),
            routing_key: RwLock::new(config.exchange.routing_key.clone()),
            link: RwLock::new(None),
            queue: RwLock::new(None),
            consumers: Mutex::new(vec![]),
            rpc_waiters: Mutex::new(JoinSet::new()),
            config,
            broker,
            host,
        }
    }

    /// Sets the kind of node driving the client. Input nodes are the default.
    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Replaces the lapin connector, e.g. with a test double.
    pub fn connector(mut self, connector: Arc<dyn AmqpConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replaces where settings based credentials are read from; the process
    /// environment by default.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialsLookup>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn node_kind(&self) -> NodeKind {
        self.kind
    }

    /// Replaces the routing key used for bindings and publishing.
    pub async fn set_routing_key(&self, routing_key: &str) {
        *self.routing_key.write().await = routing_key.to_owned();
    }

    pub async fn routing_key(&self) -> String {
        self.routing_key.read().await.clone()
    }

    /// Exchange settings with the current routing key.
    pub(crate) async fn exchange_spec(&self) -> ExchangeSpec {
        ExchangeSpec {
            routing_key: self.routing_key().await,
            ..self.config.exchange.clone()
        }
    }

    /// Routing keys to publish with; an empty field falls back to the main
    /// queue's name.
    pub(crate) async fn routing_keys(&self) -> Vec<String> {
        let field = self.routing_key().await;
        if field.trim().is_empty() {
            if let Some(queue) = self.queue.read().await.clone() {
                return vec![queue];
            }
        }
        parse_routing_keys(&field)
    }

    /// Opens the broker connection.
    ///
    /// The returned receiver yields the connection and channel lifecycle
    /// events; dropping it removes the listeners.
    pub async fn connect(&self) -> Result<LinkEvents, AmqpError> {
        let uri = broker_url(&self.broker, self.credentials.as_ref())?;
        let (connection, events) = self.connector.connect(&uri).await?;

        if let Some(stale) = self.link.write().await.replace(Link {
            connection,
            channel: None,
        }) {
            warn!("replacing a live amqp link");
            close_link(stale).await;
        }

        Ok(events)
    }

    /// Creates the channel and asserts the exchange.
    pub async fn initialize(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let channel = self.create_channel().await?;
        self.assert_exchange().await?;
        Ok(channel)
    }

    pub async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let mut link = self.link.write().await;
        let link = link.as_mut().ok_or(AmqpError::NotConnected)?;

        let channel = link.connection.create_channel().await?;
        if let Err(err) = channel.basic_qos(self.config.prefetch).await {
            warn!(
                error = err.to_string(),
                prefetch = self.config.prefetch,
                "failure to set prefetch"
            );
        }

        link.channel = Some(channel.clone());
        Ok(channel)
    }

    pub(crate) async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        self.link
            .read()
            .await
            .as_ref()
            .and_then(|link| link.channel.clone())
            .ok_or(AmqpError::NotConnected)
    }

    pub async fn assert_exchange(&self) -> Result<(), AmqpError> {
        AmqpTopology::new(self.channel().await?)
            .assert_exchange(&self.config.exchange)
            .await
    }

    /// Asserts the client's own queue and records its resolved name.
    pub async fn assert_queue(&self) -> Result<String, AmqpError> {
        let queue = AmqpTopology::new(self.channel().await?)
            .assert_queue(&self.config.queue)
            .await?;
        *self.queue.write().await = Some(queue.clone());
        Ok(queue)
    }

    /// Binds the client's queue to its exchange.
    pub async fn bind_queue(&self) -> Result<(), AmqpError> {
        let queue = self
            .queue
            .read()
            .await
            .clone()
            .ok_or(AmqpError::NotConnected)?;
        let exchange = self.exchange_spec().await;

        AmqpTopology::new(self.channel().await?)
            .bind_queue(&queue, &exchange, &self.config.headers)
            .await
    }

    /// Applies the connection and channel listener effects of one event.
    pub fn observe(&self, event: &LinkEvent) {
        self.host.status(NodeStatus::Disconnected);

        match event {
            LinkEvent::ConnectionError(err) => {
                error!(error = err.as_str(), "amqp connection error");
                self.host.error(
                    &format!("Connection error {err}"),
                    Some(ErrorReport::new(err, ErrorLocation::ConnectionErrorEvent)),
                );
            }
            LinkEvent::ConnectionClosed { error } => {
                debug!(error = ?error, "amqp connection closed");
                self.host.log("AMQP Connection closed");
            }
            LinkEvent::ChannelError(err) => {
                error!(error = err.as_str(), "amqp channel error");
                self.host.error(
                    &format!("AMQP Connection Error {err}"),
                    Some(ErrorReport::new(err, ErrorLocation::ChannelErrorEvent)),
                );
            }
        }
    }

    /// Drops the link without touching the topology.
    pub(crate) async fn detach(&self) {
        self.stop_consumers().await;
        if let Some(link) = self.link.write().await.take() {
            close_link(link).await;
        }
    }

    async fn stop_consumers(&self) {
        for handle in self.consumers.lock().await.drain(..) {
            handle.abort();
        }
        self.rpc_waiters.lock().await.shutdown().await;
    }

    /// Unbinds the queue and closes channel and connection.
    ///
    /// Never fails. A second call finds no link and no queue and does nothing.
    pub async fn close(&self) {
        self.stop_consumers().await;

        let exchange = self.exchange_spec().await;
        let queue = self.queue.write().await.take();
        let Some(link) = self.link.write().await.take() else {
            return;
        };

        if let (Some(channel), Some(queue)) = (&link.channel, queue) {
            if !exchange.name.is_empty() {
                for binding in bindings_for(&queue, &exchange, &self.config.headers) {
                    if let Err(err) = channel.queue_unbind(&binding).await {
                        error!(error = err.to_string(), "error unbinding queue");
                        break;
                    }
                }
            }
        }

        close_link(link).await;
    }
}

async fn close_link(link: Link) {
    if let Some(channel) = link.channel {
        if let Err(err) = channel.close().await {
            debug!(error = err.to_string(), "ignoring channel close failure");
        }
    }
    if let Err(err) = link.connection.close().await {
        debug!(error = err.to_string(), "ignoring connection close failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::MockAmqpChannel,
        exchange::ExchangeKind,
        queue::QueueSpec,
        testing::{connected_client, ok_channel, RecordingHost},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> ClientConfig {
        ClientConfig {
            name: "orders".to_owned(),
            prefetch: 10,
            exchange: ExchangeSpec::new("orders")
                .kind(ExchangeKind::Direct)
                .routing_key("created, updated"),
            queue: QueueSpec::new("orders-q").durable(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn operations_without_a_link_are_not_connected() {
        let host = Arc::new(RecordingHost::default());
        let client = Amqp::new(config(), BrokerSettings::default(), host);

        assert_eq!(client.create_channel().await.err(), Some(AmqpError::NotConnected));
        assert_eq!(client.assert_exchange().await, Err(AmqpError::NotConnected));
        client.close().await;
    }

    #[tokio::test]
    async fn create_channel_sets_prefetch() {
        let prefetch = Arc::new(AtomicUsize::new(0));
        let seen = prefetch.clone();
        let mut channel = MockAmqpChannel::new();
        channel.expect_basic_qos().returning(move |n| {
            seen.store(n as usize, Ordering::SeqCst);
            Ok(())
        });

        let (client, _host) = connected_client(config(), NodeKind::AmqpIn, channel).await;
        client.create_channel().await.unwrap();

        assert_eq!(prefetch.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn prefetch_failure_does_not_fail_channel_creation() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_basic_qos()
            .returning(|_| Err(AmqpError::QoSDeclarationError("nope".to_owned())));

        let (client, _host) = connected_client(config(), NodeKind::AmqpIn, channel).await;
        assert!(client.create_channel().await.is_ok());
    }

    #[tokio::test]
    async fn close_unbinds_every_routing_key_once() {
        let unbinds = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));

        let mut channel = ok_channel();
        let counter = unbinds.clone();
        channel.expect_queue_unbind().returning(move |binding| {
            assert_eq!(binding.exchange_name, "orders");
            assert_eq!(binding.queue_name, "orders-q");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = closes.clone();
        channel.expect_close().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (client, _host) = connected_client(config(), NodeKind::AmqpIn, channel).await;
        client.initialize().await.unwrap();
        client.assert_queue().await.unwrap();

        client.close().await;
        client.close().await;

        assert_eq!(unbinds.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_routing_key_binds_and_unbinds_the_queue_name() {
        let calls = Arc::new(std::sync::Mutex::new(vec![]));
        let mut channel = MockAmqpChannel::new();
        channel.expect_basic_qos().returning(|_| Ok(()));
        channel.expect_exchange_declare().returning(|_, _, _| Ok(()));
        channel
            .expect_queue_declare()
            .returning(|spec| Ok(spec.name.clone()));
        let seen = calls.clone();
        channel.expect_queue_bind().returning(move |binding| {
            seen.lock().unwrap().push(format!("bind {}", binding.routing_key));
            Ok(())
        });
        let seen = calls.clone();
        channel.expect_queue_unbind().returning(move |binding| {
            seen.lock().unwrap().push(format!("unbind {}", binding.routing_key));
            Ok(())
        });
        channel.expect_close().returning(|| Ok(()));

        let config = ClientConfig {
            exchange: ExchangeSpec::new("events").kind(ExchangeKind::Direct),
            queue: QueueSpec::new("events-q"),
            ..Default::default()
        };
        let (client, _host) = connected_client(config, NodeKind::AmqpIn, channel).await;
        client.initialize().await.unwrap();
        client.assert_queue().await.unwrap();
        client.bind_queue().await.unwrap();
        client.close().await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["bind events-q".to_owned(), "unbind events-q".to_owned()]
        );
    }

    #[tokio::test]
    async fn close_swallows_teardown_failures() {
        let unbinds = Arc::new(AtomicUsize::new(0));
        let mut channel = ok_channel();
        let counter = unbinds.clone();
        channel.expect_queue_unbind().returning(move |binding| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AmqpError::UnbindingError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ))
        });
        channel
            .expect_close()
            .returning(|| Err(AmqpError::CloseError("already closed".to_owned())));

        let (client, _host) = connected_client(config(), NodeKind::AmqpIn, channel).await;
        client.initialize().await.unwrap();
        client.assert_queue().await.unwrap();

        client.close().await;
        assert_eq!(unbinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn observing_a_channel_error_disconnects_and_reports() {
        let host = Arc::new(RecordingHost::default());
        let client = Amqp::new(config(), BrokerSettings::default(), host.clone());

        client.observe(&LinkEvent::ChannelError("PRECONDITION_FAILED".to_owned()));

        assert_eq!(host.statuses(), vec![NodeStatus::Disconnected]);
        let errors = host.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].1.as_ref().and_then(|r| r.location),
            Some(ErrorLocation::ChannelErrorEvent)
        );
    }

    #[tokio::test]
    async fn routing_key_can_change_at_runtime() {
        let host = Arc::new(RecordingHost::default());
        let client = Amqp::new(config(), BrokerSettings::default(), host);

        client.set_routing_key("deleted").await;
        assert_eq!(client.routing_keys().await, vec!["deleted"]);
        assert_eq!(client.config().exchange.routing_key, "created, updated");
    }
}
