// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! This module provides the exchange side of the client topology: the exchange
//! kinds understood by the binding rules and the exchange specification read
//! from the host configuration, including the comma separated routing key field.

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};

/// Represents the types of exchanges the client can declare and bind to.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - Other: Any other broker or plugin exchange type, declared but never bound
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    Other(String),
}

impl ExchangeKind {
    /// Whether queues bound to this kind of exchange are filtered by routing key.
    pub fn can_have_routing_key(&self) -> bool {
        matches!(self, ExchangeKind::Direct | ExchangeKind::Topic)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for ExchangeKind {
    fn from(value: &str) -> Self {
        match value {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            other => ExchangeKind::Other(other.to_owned()),
        }
    }
}

impl From<String> for ExchangeKind {
    fn from(value: String) -> Self {
        ExchangeKind::from(value.as_str())
    }
}

impl From<ExchangeKind> for String {
    fn from(value: ExchangeKind) -> Self {
        value.as_str().to_owned()
    }
}

impl TryInto<lapin::ExchangeKind> for ExchangeKind {
    type Error = AmqpError;

    /// Converts the internal ExchangeKind to lapin's ExchangeKind.
    fn try_into(self) -> Result<lapin::ExchangeKind, AmqpError> {
        match self {
            ExchangeKind::Direct => Ok(lapin::ExchangeKind::Direct),
            ExchangeKind::Fanout => Ok(lapin::ExchangeKind::Fanout),
            ExchangeKind::Headers => Ok(lapin::ExchangeKind::Headers),
            ExchangeKind::Topic => Ok(lapin::ExchangeKind::Topic),
            ExchangeKind::Other(kind) if kind.is_empty() => {
                Err(AmqpError::DeclareExchangeError("empty exchange type".to_owned()))
            }
            ExchangeKind::Other(kind) => Ok(lapin::ExchangeKind::Custom(kind)),
        }
    }
}

/// Exchange settings of a client.
///
/// An empty `name` means the default exchange: nothing is declared and
/// publishing sends straight to the queue named by the routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub routing_key: String,
    pub durable: bool,
}

impl ExchangeSpec {
    pub fn new(name: &str) -> ExchangeSpec {
        ExchangeSpec {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }
}

/// Splits a comma separated routing key field into its keys.
///
/// Segments are trimmed and empty segments are dropped. A blank field yields a
/// single empty key, which is what fanout and headers exchanges expect.
pub fn parse_routing_keys(field: &str) -> Vec<String> {
    if field.trim().is_empty() {
        return vec![String::new()];
    }

    field
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .collect()
}
