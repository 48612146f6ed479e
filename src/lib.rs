// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # amqp-flow
//!
//! AMQP 0-9-1 integration for a host process that runs input, output and
//! manual-ack nodes. `Amqp` is the client of one node; `AmqpNode` keeps it
//! connected, reconnecting as the node's settings ask.

mod codec;
mod otel;

#[cfg(test)]
mod testing;

pub mod channel;
pub mod client;
pub mod configs;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod host;
pub mod message;
pub mod node;
pub mod publisher;
pub mod queue;
pub mod rpc;
pub mod topology;

pub use client::Amqp;
pub use configs::{BrokerSettings, ClientConfig, NodeConfig};
pub use errors::AmqpError;
pub use host::{Host, NodeKind, NodeStatus};
pub use message::{AckMode, InboundMessage, ManualAck, MessageProperties, NodeMessage, Payload};
pub use node::{AmqpNode, LinkState};
