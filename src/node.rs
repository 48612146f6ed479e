// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Node Lifecycle
//!
//! `AmqpNode` keeps a client connected for as long as the host runs it. A
//! supervisor task connects, creates the channel, asserts the exchange and,
//! for consuming nodes, starts the consumer. It then watches the connection
//! and channel events:
//!
//! - a closed connection always schedules a reconnect;
//! - connection and channel errors schedule one only with `reconnectOnError`;
//! - a host message carrying `reconnectCall` always schedules one.
//!
//! Reconnecting drops the event listeners, closes channel and connection and
//! tries again after `RECONNECT_DELAY`. A rejected login or an unexpected
//! failure halts the node until the host asks for a reconnect or stops it.

use crate::{
    channel::{LinkEvent, LinkEvents},
    client::Amqp,
    errors::{AmqpError, ConnectFailure, ErrorLocation, ErrorReport},
    host::{NodeKind, NodeStatus},
    message::{InboundMessage, MessageProperties, Payload},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Where the supervisor currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    /// Waiting out the reconnect delay.
    Waiting,
    /// Given up until a manual reconnect.
    Halted,
    Stopped,
}

enum Wake {
    Reconnect,
    Shutdown,
}

pub struct AmqpNode {
    client: Arc<Amqp>,
    state: Arc<watch::Sender<LinkState>>,
    shutdown: watch::Sender<bool>,
    reconnect_tx: mpsc::UnboundedSender<()>,
    reconnect_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpNode {
    pub fn new(client: Amqp) -> AmqpNode {
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Idle);
        let (shutdown, _) = watch::channel(false);

        AmqpNode {
            client: Arc::new(client),
            state: Arc::new(state),
            shutdown,
            reconnect_tx,
            reconnect_rx: Mutex::new(Some(reconnect_rx)),
            supervisor: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Arc<Amqp> {
        &self.client
    }

    /// Subscribes to the supervisor state.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Spawns the supervisor. A node starts once.
    pub async fn start(&self) {
        let Some(reconnects) = self.reconnect_rx.lock().await.take() else {
            warn!(node = self.client.config.name.as_str(), "node already started");
            return;
        };

        self.client.host.status(NodeStatus::Disconnected);
        let supervisor = Supervisor {
            client: self.client.clone(),
            state: self.state.clone(),
            reconnects,
            shutdown: self.shutdown.subscribe(),
        };
        *self.supervisor.lock().await = Some(tokio::spawn(supervisor.run()));
    }

    /// Stops the supervisor, cancelling any pending reconnect, and closes
    /// the client.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.supervisor.lock().await.take() {
            if let Err(err) = handle.await {
                error!(error = err.to_string(), "supervisor ended abnormally");
            }
        }

        self.client.close().await;
        self.state.send_replace(LinkState::Stopped);
    }

    /// Asks the supervisor to drop the link and connect again.
    pub fn reconnect(&self) {
        if self.reconnect_tx.send(()).is_err() {
            debug!("reconnect requested after the supervisor ended");
        }
    }

    /// Handles a message the host sends into the node.
    ///
    /// Publishing nodes publish it. Manual-ack nodes run its acknowledgment
    /// command. Consuming nodes reconnect when the payload asks them to.
    pub async fn input(&self, msg: InboundMessage) {
        match self.client.node_kind() {
            NodeKind::AmqpOut => {
                self.publish(&msg.payload, Some(&msg.properties)).await;
                return;
            }
            NodeKind::AmqpInManualAck => {
                if let Err(err) = self.client.dispatch(&msg).await {
                    error!(error = err.to_string(), "failure to acknowledge message");
                    self.client
                        .host
                        .error(&format!("Could not acknowledge message: {err}"), None);
                }
            }
            NodeKind::AmqpIn => {}
        }

        if msg.is_reconnect_call() {
            info!(node = self.client.config.name.as_str(), "manual reconnect");
            self.reconnect();
        }
    }

    /// Publishes a host payload through the client, once per routing key.
    pub async fn publish(&self, payload: &Payload, properties: Option<&MessageProperties>) {
        self.client.publish_payload(payload, properties).await
    }

    /// Replaces the routing key used by later publishes and bindings.
    pub async fn set_routing_key(&self, routing_key: &str) {
        self.client.set_routing_key(routing_key).await
    }
}

/// Whether a link event schedules a reconnect.
pub fn triggers_reconnect(event: &LinkEvent, reconnect_on_error: bool) -> bool {
    match event {
        LinkEvent::ConnectionClosed { .. } => true,
        LinkEvent::ConnectionError(_) | LinkEvent::ChannelError(_) => reconnect_on_error,
    }
}

/// Connects, initializes and, for consuming nodes, starts the consumer.
async fn establish(client: Arc<Amqp>) -> Result<LinkEvents, AmqpError> {
    let events = client.connect().await?;
    client.initialize().await?;
    if client.node_kind().consumes() {
        client.consume().await;
    }
    Ok(events)
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

struct Supervisor {
    client: Arc<Amqp>,
    state: Arc<watch::Sender<LinkState>>,
    reconnects: mpsc::UnboundedReceiver<()>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            while self.reconnects.try_recv().is_ok() {}

            self.state.send_replace(LinkState::Connecting);
            self.client.host.status(NodeStatus::Connecting);

            let mut attempt = tokio::spawn(establish(self.client.clone()));
            let joined = tokio::select! {
                _ = stopped(&mut self.shutdown) => {
                    attempt.abort();
                    return;
                }
                joined = &mut attempt => joined,
            };

            let wake = match joined {
                Ok(Ok(events)) => {
                    info!(node = self.client.config.name.as_str(), "amqp link established");
                    self.state.send_replace(LinkState::Connected);
                    self.client.host.status(NodeStatus::Connected);
                    self.watch_link(events).await
                }
                Ok(Err(err)) => self.on_failure(err).await,
                Err(err) => {
                    error!(error = err.to_string(), "connection attempt aborted");
                    Wake::Reconnect
                }
            };
            if let Wake::Shutdown = wake {
                return;
            }

            self.client.detach().await;
            self.state.send_replace(LinkState::Waiting);
            debug!(delay = ?RECONNECT_DELAY, "reconnecting");

            tokio::select! {
                _ = stopped(&mut self.shutdown) => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    /// Waits for the event that ends the current link. Returning drops the
    /// event receiver.
    async fn watch_link(&mut self, mut events: LinkEvents) -> Wake {
        let reconnect_on_error = self.client.config.reconnect_on_error;
        let mut open = true;

        loop {
            tokio::select! {
                _ = stopped(&mut self.shutdown) => return Wake::Shutdown,
                Some(()) = self.reconnects.recv() => return Wake::Reconnect,
                event = events.recv(), if open => match event {
                    Some(event) => {
                        self.client.observe(&event);
                        if triggers_reconnect(&event, reconnect_on_error) {
                            return Wake::Reconnect;
                        }
                    }
                    None => open = false,
                },
            }
        }
    }

    async fn on_failure(&mut self, err: AmqpError) -> Wake {
        let host = self.client.host.clone();
        let report = ErrorReport::new(&err, ErrorLocation::ConnectError);

        match err.connect_failure() {
            Some(ConnectFailure::ConnectionRefused) => {
                warn!(error = err.to_string(), "broker refused the connection");
                host.status(NodeStatus::Disconnected);
                if self.client.config.reconnect_on_error {
                    return Wake::Reconnect;
                }
            }
            Some(ConnectFailure::InvalidLogin) => {
                error!(error = err.to_string(), "broker rejected the login");
                host.status(NodeStatus::Invalid);
                host.error(&format!("Could not connect to broker {err}"), Some(report));
            }
            _ => {
                error!(error = err.to_string(), "failure to establish the amqp link");
                host.status(NodeStatus::Error);
                host.error(&err.to_string(), Some(report));
            }
        }

        self.halt().await
    }

    async fn halt(&mut self) -> Wake {
        self.client.detach().await;
        self.state.send_replace(LinkState::Halted);

        tokio::select! {
            _ = stopped(&mut self.shutdown) => Wake::Shutdown,
            Some(()) = self.reconnects.recv() => Wake::Reconnect,
        }
    }
}
