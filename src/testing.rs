// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Shared test doubles.

use crate::{
    channel::{
        AmqpChannel, AmqpConnection, DeliveryStream, LinkEvent, MockAmqpChannel,
        MockAmqpConnection, MockAmqpConnector,
    },
    client::Amqp,
    configs::{BrokerSettings, ClientConfig},
    errors::{AmqpError, ErrorReport},
    host::{Host, NodeKind, NodeStatus},
    message::{MessageProperties, NodeMessage, RawDelivery},
};
use futures_util::{stream, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};

/// Host that records everything it is told.
#[derive(Default)]
pub(crate) struct RecordingHost {
    sent: Mutex<Vec<NodeMessage>>,
    errors: Mutex<Vec<(String, Option<ErrorReport>)>>,
    statuses: Mutex<Vec<NodeStatus>>,
    logs: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub(crate) fn sent(&self) -> Vec<NodeMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<(String, Option<ErrorReport>)> {
        self.errors.lock().unwrap().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<NodeStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub(crate) fn last_status(&self) -> Option<NodeStatus> {
        self.statuses.lock().unwrap().last().copied()
    }

    pub(crate) fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }
}

impl Host for RecordingHost {
    fn send(&self, msg: NodeMessage) {
        self.sent.lock().unwrap().push(msg);
    }

    fn error(&self, text: &str, report: Option<ErrorReport>) {
        self.errors.lock().unwrap().push((text.to_owned(), report));
    }

    fn status(&self, status: NodeStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn log(&self, text: &str) {
        self.logs.lock().unwrap().push(text.to_owned());
    }
}

/// Channel mock accepting qos, exchange/queue declarations and bindings.
pub(crate) fn ok_channel() -> MockAmqpChannel {
    let mut channel = MockAmqpChannel::new();
    channel.expect_basic_qos().returning(|_| Ok(()));
    channel.expect_exchange_declare().returning(|_, _, _| Ok(()));
    channel
        .expect_queue_declare()
        .returning(|spec| Ok(spec.name.clone()));
    channel.expect_queue_bind().returning(|_| Ok(()));
    channel
}

/// Connection mock handing out `channel` once.
pub(crate) fn connection_with(channel: MockAmqpChannel) -> MockAmqpConnection {
    let mut connection = MockAmqpConnection::new();
    connection
        .expect_create_channel()
        .return_once(move || Ok(Arc::new(channel) as Arc<dyn AmqpChannel>));
    connection.expect_close().returning(|| Ok(()));
    connection
}

/// A client already connected to a mocked broker; the channel is not yet
/// created.
pub(crate) async fn connected_client(
    config: ClientConfig,
    kind: NodeKind,
    channel: MockAmqpChannel,
) -> (Amqp, Arc<RecordingHost>) {
    let host = Arc::new(RecordingHost::default());
    let connection = connection_with(channel);
    let (_events, rx) = mpsc::unbounded_channel::<LinkEvent>();

    let mut connector = MockAmqpConnector::new();
    connector
        .expect_connect()
        .return_once(move |_| Ok((Arc::new(connection) as Arc<dyn AmqpConnection>, rx)));

    let client = Amqp::new(config, BrokerSettings::default(), host.clone())
        .kind(kind)
        .connector(Arc::new(connector));
    client.connect().await.unwrap();

    (client, host)
}

/// A delivery stream fed by the returned sender.
pub(crate) fn delivery_stream() -> (
    UnboundedSender<Result<RawDelivery, AmqpError>>,
    DeliveryStream,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let deliveries = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();
    (tx, deliveries)
}

pub(crate) fn delivery(tag: u64, body: &str, correlation_id: Option<&str>) -> RawDelivery {
    RawDelivery {
        delivery_tag: tag,
        exchange: "orders".to_owned(),
        routing_key: "created".to_owned(),
        redelivered: false,
        properties: MessageProperties {
            correlation_id: correlation_id.map(str::to_owned),
            ..Default::default()
        },
        data: body.as_bytes().to_vec(),
    }
}
