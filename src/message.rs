// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages Exchanged with the Host
//!
//! This module defines the AMQP message properties as the host sees them, the
//! decoded payload, the inbound message forwarded for each delivery and the
//! manual acknowledgment command the host attaches when it wants a delivery
//! acked, nacked or rejected.

use crate::configs::{truthy, ClientConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Basic properties of an AMQP message.
///
/// Every field is optional so property sets can be overlaid: the node level
/// defaults, then the per call override, then the RPC identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

impl MessageProperties {
    /// Returns `self` with every field set in `other` taking precedence.
    ///
    /// The overlay is shallow: a set `headers` map replaces the whole map.
    pub fn overlay(&self, other: &MessageProperties) -> MessageProperties {
        MessageProperties {
            content_type: other.content_type.clone().or_else(|| self.content_type.clone()),
            content_encoding: other
                .content_encoding
                .clone()
                .or_else(|| self.content_encoding.clone()),
            headers: other.headers.clone().or_else(|| self.headers.clone()),
            delivery_mode: other.delivery_mode.or(self.delivery_mode),
            priority: other.priority.or(self.priority),
            correlation_id: other
                .correlation_id
                .clone()
                .or_else(|| self.correlation_id.clone()),
            reply_to: other.reply_to.clone().or_else(|| self.reply_to.clone()),
            expiration: other.expiration.clone().or_else(|| self.expiration.clone()),
            message_id: other.message_id.clone().or_else(|| self.message_id.clone()),
            timestamp: other.timestamp.or(self.timestamp),
            kind: other.kind.clone().or_else(|| self.kind.clone()),
            user_id: other.user_id.clone().or_else(|| self.user_id.clone()),
            app_id: other.app_id.clone().or_else(|| self.app_id.clone()),
        }
    }

    /// Reads properties out of a host value.
    ///
    /// Anything that is not a property object (a raw string, a number, a
    /// malformed object) yields empty properties.
    pub fn from_value(value: &Value) -> MessageProperties {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
                tracing::warn!(error = err.to_string(), "ignoring malformed amqp properties");
                MessageProperties::default()
            }),
            _ => MessageProperties::default(),
        }
    }
}

/// Message body as forwarded to the host.
///
/// Bodies are decoded as JSON when possible; anything else is kept as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Raw(String),
}

impl Payload {
    /// Decodes `text` as JSON, falling back to the raw text.
    pub fn parse(text: &str) -> Payload {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Raw(text.to_owned()),
        }
    }

    /// Decodes a message body; invalid UTF-8 is replaced lossily.
    pub fn from_bytes(data: &[u8]) -> Payload {
        Payload::parse(&String::from_utf8_lossy(data))
    }

    /// Converts the payload into a JSON value, raw text becoming a string.
    pub fn into_value(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::Raw(text) => Value::String(text),
        }
    }
}

/// Acknowledgment operation requested by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AckMode {
    #[default]
    Ack,
    AckAll,
    Nack,
    NackAll,
    Reject,
}

/// Manual acknowledgment command embedded in a previously delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAck {
    #[serde(default)]
    pub ack_mode: AckMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_up_to: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue: Option<bool>,
}

/// A delivery as handed over by the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDelivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub data: Vec<u8>,
}

/// A delivery forwarded to the host.
///
/// The host hands the same value back, with `manual_ack` set, to acknowledge it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub delivery_tag: u64,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub redelivered: bool,
    #[serde(default)]
    pub properties: MessageProperties,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_ack: Option<ManualAck>,
}

impl InboundMessage {
    /// Decodes a raw delivery into the message forwarded to the host.
    pub fn assemble(delivery: RawDelivery) -> InboundMessage {
        InboundMessage {
            payload: Payload::from_bytes(&delivery.data),
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange,
            routing_key: delivery.routing_key,
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            manual_ack: None,
        }
    }

    /// Whether the payload asks the node to drop and re-establish its link.
    pub fn is_reconnect_call(&self) -> bool {
        match &self.payload {
            Payload::Json(Value::Object(map)) => truthy(map.get("reconnectCall")),
            _ => false,
        }
    }
}

/// Synthetic message emitted when an RPC reply did not arrive in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcTimeout {
    pub message: String,
    pub config: ClientConfig,
}

/// Anything the client forwards to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeMessage {
    Delivery(InboundMessage),
    RpcTimeout {
        payload: RpcTimeout,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_body_decodes_to_a_mapping() {
        assert_eq!(Payload::parse("{\"a\":1}"), Payload::Json(json!({"a": 1})));
    }

    #[test]
    fn non_json_body_is_kept_as_text() {
        assert_eq!(Payload::parse("not json"), Payload::Raw("not json".to_owned()));
    }

    #[test]
    fn overlay_prefers_the_override() {
        let defaults = MessageProperties {
            content_type: Some("application/json".to_owned()),
            correlation_id: Some("default".to_owned()),
            priority: Some(1),
            ..Default::default()
        };
        let over = MessageProperties {
            correlation_id: Some("call".to_owned()),
            ..Default::default()
        };

        let merged = defaults.overlay(&over);
        assert_eq!(merged.correlation_id.as_deref(), Some("call"));
        assert_eq!(merged.content_type.as_deref(), Some("application/json"));
        assert_eq!(merged.priority, Some(1));
    }

    #[test]
    fn properties_from_raw_string_are_empty() {
        assert_eq!(
            MessageProperties::from_value(&json!("contentType=text")),
            MessageProperties::default()
        );
        let props = MessageProperties::from_value(&json!({"replyTo": "replies", "type": "ping"}));
        assert_eq!(props.reply_to.as_deref(), Some("replies"));
        assert_eq!(props.kind.as_deref(), Some("ping"));
    }

    #[test]
    fn ack_command_deserializes_from_host_json() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "deliveryTag": 7,
            "payload": {"reconnectCall": true},
            "manualAck": {"ackMode": "nackAll", "requeue": false}
        }))
        .unwrap();

        let ack = msg.manual_ack.clone().unwrap();
        assert_eq!(ack.ack_mode, AckMode::NackAll);
        assert_eq!(ack.requeue, Some(false));
        assert_eq!(ack.all_up_to, None);
        assert!(msg.is_reconnect_call());
    }

    #[test]
    fn reconnect_call_follows_host_truthiness() {
        let with = |flag: Value| -> InboundMessage {
            serde_json::from_value(json!({"payload": {"reconnectCall": flag}})).unwrap()
        };

        for falsy in [json!(0), json!(""), json!(false), Value::Null] {
            assert!(!with(falsy).is_reconnect_call());
        }
        for set in [json!(1), json!("yes"), json!(true)] {
            assert!(with(set).is_reconnect_call());
        }
        let raw: InboundMessage = serde_json::from_value(json!({"payload": "reconnect"})).unwrap();
        assert!(!raw.is_reconnect_call());
    }
}
