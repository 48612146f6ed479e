// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! This module asserts the exchange and queue a client works with and binds
//! them together. Which bindings get installed depends on the exchange kind;
//! see `queue::bindings_for`.
//!
//! The main components are:
//! - `Topology` trait: Interface for topology assertion
//! - `AmqpTopology`: Implementation of the Topology trait over a channel

use crate::{
    channel::AmqpChannel,
    errors::AmqpError,
    exchange::ExchangeSpec,
    queue::{bindings_for, QueueSpec},
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait Topology {
    /// Declares the exchange; an unnamed exchange is left alone.
    async fn assert_exchange(&self, def: &ExchangeSpec) -> Result<(), AmqpError>;

    /// Declares the queue and returns its resolved name.
    async fn assert_queue(&self, def: &QueueSpec) -> Result<String, AmqpError>;

    /// Binds `queue` to the exchange following the exchange kind rules.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &ExchangeSpec,
        headers: &Map<String, Value>,
    ) -> Result<(), AmqpError>;
}

pub struct AmqpTopology {
    channel: Arc<dyn AmqpChannel>,
}

impl AmqpTopology {
    pub fn new(channel: Arc<dyn AmqpChannel>) -> AmqpTopology {
        AmqpTopology { channel }
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    async fn assert_exchange(&self, def: &ExchangeSpec) -> Result<(), AmqpError> {
        if def.name.is_empty() {
            return Ok(());
        }

        debug!("creating exchange: {}", def.name);
        match self
            .channel
            .exchange_declare(&def.name, &def.kind, def.durable)
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(err)
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn assert_queue(&self, def: &QueueSpec) -> Result<String, AmqpError> {
        debug!("creating queue: {}", def.name);

        match self.channel.queue_declare(def).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(err)
            }
            Ok(name) => {
                debug!("queue: {} was created", name);
                Ok(name)
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &ExchangeSpec,
        headers: &Map<String, Value>,
    ) -> Result<(), AmqpError> {
        for binding in bindings_for(queue, exchange, headers) {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            if let Err(err) = self.channel.queue_bind(&binding).await {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(err);
            }
        }

        Ok(())
    }
}
