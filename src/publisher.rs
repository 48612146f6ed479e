// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module publishes messages to the client's exchange. A single publish
//! fans out to one message per routing key in the comma separated routing key
//! field. Properties are the node defaults overlaid by the per call override;
//! in RPC mode the correlation id and reply-to queue are resolved first and a
//! reply consumer is set up before the request goes out. The current trace
//! context travels in the message headers.

use crate::{
    client::Amqp,
    errors::AmqpError,
    message::{MessageProperties, Payload},
    otel,
};
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

impl Amqp {
    /// Publishes `body` once per routing key.
    ///
    /// Failures are reported to the host per routing key; the remaining keys
    /// are still attempted.
    pub async fn publish(&self, body: &[u8], properties: Option<&MessageProperties>) {
        for routing_key in self.routing_keys().await {
            self.publish_one(body, properties, &routing_key).await;
        }
    }

    /// Serializes a host payload and publishes it. Strings are sent as is.
    pub async fn publish_payload(&self, payload: &Payload, properties: Option<&MessageProperties>) {
        let body = match payload {
            Payload::Raw(text) | Payload::Json(Value::String(text)) => text.as_bytes().to_vec(),
            Payload::Json(value) => value.to_string().into_bytes(),
        };
        self.publish(&body, properties).await
    }

    pub async fn publish_one(
        &self,
        body: &[u8],
        properties: Option<&MessageProperties>,
        routing_key: &str,
    ) {
        if let Err(err) = self.try_publish_one(body, properties, routing_key).await {
            error!(
                error = err.to_string(),
                routing_key, "error publishing message"
            );
            self.host
                .error(&format!("Could not publish message: {err}"), None);
        }
    }

    async fn try_publish_one(
        &self,
        body: &[u8],
        properties: Option<&MessageProperties>,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        let channel = self.channel().await?;

        let mut props = match properties {
            Some(over) => self.config.amqp_properties.overlay(over),
            None => self.config.amqp_properties.clone(),
        };

        if self.config.outputs {
            let (correlation_id, reply_to) =
                resolve_rpc_ids(properties, &self.config.amqp_properties);
            self.handle_remote_procedure_call(&correlation_id, &reply_to)
                .await;
            props.correlation_id = Some(correlation_id);
            props.reply_to = Some(reply_to);
        }

        let mut headers = props.headers.take().unwrap_or_default();
        otel::inject_current(&mut headers);
        props.headers = (!headers.is_empty()).then_some(headers);

        debug!(
            exchange = self.config.exchange.name.as_str(),
            routing_key, "publishing message"
        );
        channel
            .basic_publish(&self.config.exchange.name, routing_key, body, &props)
            .await
    }
}

/// Resolves the RPC correlation id and reply-to queue: the per call override
/// wins over the node defaults, and a fresh id fills whatever is left.
pub fn resolve_rpc_ids(
    over: Option<&MessageProperties>,
    defaults: &MessageProperties,
) -> (String, String) {
    (
        first_set([
            over.and_then(|p| p.correlation_id.as_ref()),
            defaults.correlation_id.as_ref(),
        ]),
        first_set([
            over.and_then(|p| p.reply_to.as_ref()),
            defaults.reply_to.as_ref(),
        ]),
    )
}

fn first_set(candidates: [Option<&String>; 2]) -> String {
    candidates
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::ClientConfig,
        exchange::{ExchangeKind, ExchangeSpec},
        host::NodeKind,
        queue::QueueSpec,
        testing::{connected_client, ok_channel, RecordingHost},
    };
    use std::sync::{Arc, Mutex};

    type Published = Arc<Mutex<Vec<(String, String, Vec<u8>, MessageProperties)>>>;

    fn config(routing_key: &str) -> ClientConfig {
        ClientConfig {
            exchange: ExchangeSpec::new("orders")
                .kind(ExchangeKind::Direct)
                .routing_key(routing_key),
            queue: QueueSpec::new("orders-q"),
            amqp_properties: MessageProperties {
                content_type: Some("application/json".to_owned()),
                priority: Some(1),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn publishing_client(
        config: ClientConfig,
        fail_on: Option<&'static str>,
    ) -> (Amqp, Published, Arc<RecordingHost>) {
        let published: Published = Arc::new(Mutex::new(vec![]));
        let seen = published.clone();

        let mut channel = ok_channel();
        channel
            .expect_basic_publish()
            .returning(move |exchange, key, body, props| {
                if Some(key) == fail_on {
                    return Err(AmqpError::PublishingError("channel closed".to_owned()));
                }
                seen.lock().unwrap().push((
                    exchange.to_owned(),
                    key.to_owned(),
                    body.to_vec(),
                    props.clone(),
                ));
                Ok(())
            });

        let (client, host) = connected_client(config, NodeKind::AmqpOut, channel).await;
        client.initialize().await.unwrap();
        (client, published, host)
    }

    #[tokio::test]
    async fn publishes_once_per_routing_key() {
        let (client, published, _host) = publishing_client(config("a, b ,, c"), None).await;

        client.publish(b"hello", None).await;

        let keys: Vec<_> = published.lock().unwrap().iter().map(|p| p.1.clone()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failing_key_does_not_stop_the_others() {
        let (client, published, host) = publishing_client(config("a,b,c"), Some("b")).await;

        client.publish(b"hello", None).await;

        let keys: Vec<_> = published.lock().unwrap().iter().map(|p| p.1.clone()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(host.errors().len(), 1);
        assert!(host.errors()[0].0.starts_with("Could not publish message"));
    }

    #[tokio::test]
    async fn override_is_overlaid_on_defaults() {
        let (client, published, _host) = publishing_client(config("a"), None).await;
        let over = MessageProperties {
            priority: Some(9),
            message_id: Some("m-1".to_owned()),
            ..Default::default()
        };

        client.publish(b"hello", Some(&over)).await;

        let published = published.lock().unwrap();
        let props = &published[0].3;
        assert_eq!(props.priority, Some(9));
        assert_eq!(props.message_id.as_deref(), Some("m-1"));
        assert_eq!(props.content_type.as_deref(), Some("application/json"));
        assert_eq!(props.correlation_id, None);
        assert_eq!(props.reply_to, None);
    }

    #[tokio::test]
    async fn empty_exchange_sends_to_the_routing_key() {
        let mut config = config("work-queue");
        config.exchange.name = String::new();
        let (client, published, _host) = publishing_client(config, None).await;

        client.publish(b"job", None).await;

        let published = published.lock().unwrap();
        assert_eq!(published[0].0, "");
        assert_eq!(published[0].1, "work-queue");
    }

    #[tokio::test]
    async fn json_payloads_are_serialized() {
        let (client, published, _host) = publishing_client(config("a"), None).await;

        client
            .publish_payload(&Payload::Json(serde_json::json!({"id": 7})), None)
            .await;
        client
            .publish_payload(&Payload::Json(Value::String("plain".to_owned())), None)
            .await;

        let published = published.lock().unwrap();
        assert_eq!(published[0].2, b"{\"id\":7}".to_vec());
        assert_eq!(published[1].2, b"plain".to_vec());
    }

    #[test]
    fn rpc_ids_prefer_override_then_defaults() {
        let defaults = MessageProperties {
            correlation_id: Some("default-id".to_owned()),
            reply_to: Some("default-replies".to_owned()),
            ..Default::default()
        };
        let over = MessageProperties {
            correlation_id: Some("call-id".to_owned()),
            reply_to: Some(String::new()),
            ..Default::default()
        };

        assert_eq!(
            resolve_rpc_ids(Some(&over), &defaults),
            ("call-id".to_owned(), "default-replies".to_owned())
        );
    }

    #[test]
    fn rpc_ids_are_generated_when_missing() {
        let (correlation_id, reply_to) = resolve_rpc_ids(None, &MessageProperties::default());
        assert!(Uuid::parse_str(&correlation_id).is_ok());
        assert!(Uuid::parse_str(&reply_to).is_ok());
        assert_ne!(correlation_id, reply_to);
    }
}
