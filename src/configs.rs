// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Client Configuration
//!
//! This module provides the configuration the host hands over when it creates
//! a node (`NodeConfig`), the broker settings it resolves for that node
//! (`BrokerSettings`) and the immutable per-client settings (`ClientConfig`)
//! derived from both. Credentials may come from the broker settings or from a
//! process-wide lookup.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeKind, ExchangeSpec},
    message::{MessageProperties, Payload},
    queue::QueueSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Timeout applied to RPC calls when none is configured.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 3000;
/// Setting holding the broker user name when credentials come from settings.
pub const SETTINGS_USERNAME: &str = "MW_CONTRIB_AMQP_USERNAME";
/// Setting holding the broker password when credentials come from settings.
pub const SETTINGS_PASSWORD: &str = "MW_CONTRIB_AMQP_PASSWORD";

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Credentials {
            username: username.to_owned(),
            password: password.to_owned(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Source of process-wide settings used when a broker takes its credentials
/// from settings instead of its own configuration.
pub trait CredentialsLookup: Send + Sync {
    fn setting(&self, key: &str) -> Option<String>;

    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.setting(SETTINGS_USERNAME).unwrap_or_default(),
            password: self.setting(SETTINGS_PASSWORD).unwrap_or_default(),
        }
    }
}

/// Reads settings from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialsLookup for EnvCredentials {
    fn setting(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Broker connection settings resolved by the host for a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub vhost: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub credentials_from_settings: bool,
    #[serde(default)]
    pub credentials: Credentials,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            host: "localhost".to_owned(),
            port: 5672,
            vhost: String::new(),
            tls: false,
            credentials_from_settings: false,
            credentials: Credentials::new("guest", "guest"),
        }
    }
}

/// Node configuration exactly as the host supplies it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    pub name: String,
    pub broker: String,
    pub prefetch: Option<Value>,
    pub reconnect_on_error: bool,
    pub no_ack: bool,
    pub exchange_name: String,
    pub exchange_type: String,
    pub exchange_routing_key: String,
    pub exchange_durable: bool,
    pub queue_name: String,
    pub queue_exclusive: bool,
    pub queue_durable: bool,
    pub queue_auto_delete: bool,
    pub queue_type: Option<String>,
    pub amqp_properties: Option<Value>,
    pub headers: Option<Value>,
    pub outputs: Option<Value>,
    pub rpc_timeout_milliseconds: Option<Value>,
}

impl NodeConfig {
    pub fn from_json(text: &str) -> Result<NodeConfig, AmqpError> {
        serde_json::from_str(text).map_err(|err| AmqpError::InvalidConfig(err.to_string()))
    }
}

/// Immutable per-client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub name: String,
    pub broker: String,
    pub prefetch: u16,
    pub reconnect_on_error: bool,
    pub no_ack: bool,
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub amqp_properties: MessageProperties,
    pub headers: Map<String, Value>,
    pub outputs: bool,
    #[serde(rename = "rpcTimeout")]
    pub rpc_timeout_ms: u64,
}

impl ClientConfig {
    /// Time to wait for an RPC reply; unset means the default of three seconds.
    pub fn rpc_timeout(&self) -> Duration {
        match self.rpc_timeout_ms {
            0 => Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }
}

impl From<NodeConfig> for ClientConfig {
    fn from(node: NodeConfig) -> Self {
        ClientConfig {
            prefetch: parse_prefetch(node.prefetch.as_ref()),
            reconnect_on_error: node.reconnect_on_error,
            no_ack: node.no_ack,
            exchange: ExchangeSpec {
                name: node.exchange_name,
                kind: ExchangeKind::from(node.exchange_type),
                routing_key: node.exchange_routing_key,
                durable: node.exchange_durable,
            },
            queue: QueueSpec {
                name: node.queue_name,
                exclusive: node.queue_exclusive,
                durable: node.queue_durable,
                auto_delete: node.queue_auto_delete,
                queue_type: node.queue_type,
            },
            amqp_properties: node
                .amqp_properties
                .as_ref()
                .map(|v| MessageProperties::from_value(&json_or_raw(v)))
                .unwrap_or_default(),
            headers: node
                .headers
                .as_ref()
                .and_then(|v| match json_or_raw(v) {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default(),
            outputs: truthy(node.outputs.as_ref()),
            rpc_timeout_ms: node
                .rpc_timeout_milliseconds
                .as_ref()
                .and_then(as_u64)
                .unwrap_or_default(),
            name: node.name,
            broker: node.broker,
        }
    }
}

/// Values the host stores as JSON text are decoded; everything else is kept.
fn json_or_raw(value: &Value) -> Value {
    match value {
        Value::String(text) => Payload::parse(text).into_value(),
        other => other.clone(),
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Truthiness of a host value: `false`, `0`, `""` and `null` are false.
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Coerces the host's prefetch value; unset or non numeric means unlimited (0).
pub fn parse_prefetch(value: Option<&Value>) -> u16 {
    value
        .and_then(as_u64)
        .map(|n| n.min(u16::MAX as u64) as u16)
        .unwrap_or_default()
}
