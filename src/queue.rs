// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions and Binding Rules
//!
//! This module provides the queue specification read from the host
//! configuration and the rules that turn an exchange specification into the
//! set of queue bindings to install or remove.

use crate::exchange::{parse_routing_keys, ExchangeKind, ExchangeSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Broker argument carrying the queue type (classic, quorum, stream).
pub const AMQP_ARGS_QUEUE_TYPE: &str = "x-queue-type";

/// Definition of a queue with its declaration flags.
///
/// An empty `name` lets the broker generate one; the generated name is
/// returned by the topology when the queue is asserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    pub name: String,
    pub exclusive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub queue_type: Option<String>,
}

impl QueueSpec {
    pub fn new(name: &str) -> QueueSpec {
        QueueSpec {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete once its last consumer goes away.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn queue_type(mut self, queue_type: &str) -> Self {
        self.queue_type = Some(queue_type.to_owned());
        self
    }

    /// Declaration arguments for this queue.
    pub fn arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        if let Some(queue_type) = self.queue_type.as_deref().filter(|t| !t.is_empty()) {
            args.insert(
                AMQP_ARGS_QUEUE_TYPE.to_owned(),
                Value::String(queue_type.to_owned()),
            );
        }
        args
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBinding {
    pub queue_name: String,
    pub exchange_name: String,
    pub routing_key: String,
    pub arguments: Map<String, Value>,
}

impl QueueBinding {
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            ..Default::default()
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Computes the bindings between `queue` and `exchange`.
///
/// Direct and topic exchanges get one binding per routing key, and only when
/// the exchange is named; a blank routing key field binds with the queue's
/// own name. Fanout and headers exchanges get a single binding
/// with an empty key; headers bindings carry `headers` as match arguments.
/// Any other exchange kind is not bound.
pub fn bindings_for(
    queue: &str,
    exchange: &ExchangeSpec,
    headers: &Map<String, Value>,
) -> Vec<QueueBinding> {
    match &exchange.kind {
        kind if kind.can_have_routing_key() => {
            if exchange.name.is_empty() {
                return vec![];
            }
            let field = match exchange.routing_key.trim() {
                "" => queue,
                _ => exchange.routing_key.as_str(),
            };
            parse_routing_keys(field)
                .iter()
                .map(|key| QueueBinding::new(queue).exchange(&exchange.name).routing_key(key))
                .collect()
        }
        ExchangeKind::Fanout => vec![QueueBinding::new(queue).exchange(&exchange.name)],
        ExchangeKind::Headers => vec![QueueBinding::new(queue)
            .exchange(&exchange.name)
            .arguments(headers.clone())],
        _ => vec![],
    }
}
