// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumer
//!
//! This module subscribes the client to its queue and forwards every delivery
//! to the host. Bodies are decoded as JSON with a raw text fallback. Unless the
//! consumer runs in no-ack mode or the node acknowledges manually, each
//! delivery is acked as soon as it has been forwarded. Every delivery is
//! processed inside an OpenTelemetry consumer span.

use crate::{
    channel::{AmqpChannel, DeliveryStream},
    client::Amqp,
    errors::AmqpError,
    host::Host,
    message::{InboundMessage, NodeMessage, RawDelivery},
    otel,
};
use futures_util::StreamExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error};

impl Amqp {
    /// Asserts and binds the queue, then starts forwarding its deliveries.
    ///
    /// Setup failures are reported to the host; they are never returned.
    pub async fn consume(&self) {
        if let Err(err) = self.try_consume().await {
            error!(error = err.to_string(), "failure to start consumer");
            self.host
                .error(&format!("Could not consume message: {err}"), None);
        }
    }

    async fn try_consume(&self) -> Result<(), AmqpError> {
        let no_ack = self.config.no_ack;
        let queue = self.assert_queue().await?;
        self.bind_queue().await?;

        let channel = self.channel().await?;
        let deliveries = channel.basic_consume(&queue, no_ack).await?;
        debug!(queue = queue.as_str(), no_ack, "consumer started");

        let auto_ack = !no_ack && !self.kind.is_manual_ack();
        let handle = tokio::spawn(forward(deliveries, channel, self.host.clone(), auto_ack));
        self.consumers.lock().await.push(handle);

        Ok(())
    }
}

/// Forwards deliveries until the stream ends.
pub(crate) async fn forward(
    mut deliveries: DeliveryStream,
    channel: Arc<dyn AmqpChannel>,
    host: Arc<dyn Host>,
    auto_ack: bool,
) {
    let tracer = global::tracer("amqp consumer");

    while let Some(result) = deliveries.next().await {
        match result {
            Ok(delivery) => {
                if let Err(err) =
                    deliver(&tracer, delivery, channel.as_ref(), host.as_ref(), auto_ack).await
                {
                    error!(error = err.to_string(), "error consume msg");
                }
            }
            Err(err) => error!(error = err.to_string(), "errors consume msg"),
        }
    }

    debug!("consumer stream ended");
}

/// Forwards one delivery and acks it when `auto_ack` is set.
pub(crate) async fn deliver(
    tracer: &BoxedTracer,
    delivery: RawDelivery,
    channel: &dyn AmqpChannel,
    host: &dyn Host,
    auto_ack: bool,
) -> Result<(), AmqpError> {
    let msg = InboundMessage::assemble(delivery);
    let (_ctx, mut span) =
        otel::new_span(msg.properties.headers.as_ref(), tracer, &msg.routing_key);

    debug!(
        "received: {} - exchange: {}",
        msg.delivery_tag, msg.exchange
    );

    let delivery_tag = msg.delivery_tag;
    host.send(NodeMessage::Delivery(msg));

    if auto_ack {
        if let Err(err) = channel.basic_ack(delivery_tag, false).await {
            error!("error whiling ack msg");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
            return Err(err);
        }
    }

    span.set_status(Status::Ok);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        configs::ClientConfig,
        errors::AmqpError,
        exchange::{ExchangeKind, ExchangeSpec},
        host::{MockHost, NodeKind},
        message::{NodeMessage, Payload},
        queue::QueueSpec,
        testing::{connected_client, delivery, delivery_stream, ok_channel},
    };
    use serde_json::json;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    fn config(no_ack: bool) -> ClientConfig {
        ClientConfig {
            no_ack,
            exchange: ExchangeSpec::new("orders")
                .kind(ExchangeKind::Topic)
                .routing_key("orders.*"),
            queue: QueueSpec::new("orders-q"),
            ..Default::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn deliveries_are_decoded_forwarded_and_acked() {
        let (tx, deliveries) = delivery_stream();
        let acks = Arc::new(Mutex::new(vec![]));

        let mut channel = ok_channel();
        channel
            .expect_basic_consume()
            .withf(|queue, no_ack| queue == "orders-q" && !*no_ack)
            .return_once(move |_, _| Ok(deliveries));
        let seen = acks.clone();
        channel.expect_basic_ack().returning(move |tag, multiple| {
            seen.lock().unwrap().push((tag, multiple));
            Ok(())
        });

        let (client, host) = connected_client(config(false), NodeKind::AmqpIn, channel).await;
        client.initialize().await.unwrap();
        client.consume().await;

        tx.send(Ok(delivery(1, "{\"a\":1}", None))).unwrap();
        tx.send(Ok(delivery(2, "not json", None))).unwrap();
        settle().await;

        let payloads: Vec<_> = host
            .sent()
            .into_iter()
            .map(|msg| match msg {
                NodeMessage::Delivery(msg) => msg.payload,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            payloads,
            vec![Payload::Json(json!({"a": 1})), Payload::Raw("not json".to_owned())]
        );
        assert_eq!(*acks.lock().unwrap(), vec![(1, false), (2, false)]);
    }

    #[tokio::test]
    async fn manual_ack_nodes_do_not_auto_ack() {
        let (tx, deliveries) = delivery_stream();
        let acks = Arc::new(AtomicUsize::new(0));

        let mut channel = ok_channel();
        channel
            .expect_basic_consume()
            .return_once(move |_, _| Ok(deliveries));
        let counter = acks.clone();
        channel.expect_basic_ack().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (client, host) =
            connected_client(config(false), NodeKind::AmqpInManualAck, channel).await;
        client.initialize().await.unwrap();
        client.consume().await;

        tx.send(Ok(delivery(1, "{}", None))).unwrap();
        settle().await;

        assert_eq!(host.sent().len(), 1);
        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_ack_consumers_do_not_ack() {
        let (tx, deliveries) = delivery_stream();

        let mut channel = ok_channel();
        channel
            .expect_basic_consume()
            .withf(|_, no_ack| *no_ack)
            .return_once(move |_, _| Ok(deliveries));
        channel.expect_basic_ack().never();

        let (client, host) = connected_client(config(true), NodeKind::AmqpIn, channel).await;
        client.initialize().await.unwrap();
        client.consume().await;

        tx.send(Ok(delivery(1, "{}", None))).unwrap();
        settle().await;

        assert_eq!(host.sent().len(), 1);
    }

    #[tokio::test]
    async fn setup_failure_is_reported_not_returned() {
        let mut channel = ok_channel();
        channel
            .expect_basic_consume()
            .returning(|queue, _| Err(AmqpError::ConsumerDeclarationError(queue.to_owned())));

        let (client, host) = connected_client(config(false), NodeKind::AmqpIn, channel).await;
        client.initialize().await.unwrap();
        client.consume().await;

        let errors = host.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].0.starts_with("Could not consume message"));
    }

    #[tokio::test]
    async fn ack_failure_is_returned_from_deliver() {
        let mut channel = crate::channel::MockAmqpChannel::new();
        channel
            .expect_basic_ack()
            .returning(|_, _| Err(AmqpError::AckMessageError));
        let mut host = MockHost::new();
        host.expect_send().times(1).return_const(());

        let result = super::deliver(
            &opentelemetry::global::tracer("test"),
            delivery(9, "{}", None),
            &channel,
            &host,
            true,
        )
        .await;

        assert_eq!(result, Err(AmqpError::AckMessageError));
    }
}
