// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Host Collaborator
//!
//! The workflow host that owns a node receives delivered messages, error
//! reports, status updates and log lines through the `Host` trait.

use crate::{errors::ErrorReport, message::NodeMessage};
use serde::Serialize;

/// Node state rendered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    Disconnected,
    Connecting,
    Connected,
    Invalid,
    Error,
}

/// Kind of node the host created, deciding whether it consumes and who acks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    #[default]
    #[serde(rename = "amqp-in")]
    AmqpIn,
    #[serde(rename = "amqp-out")]
    AmqpOut,
    #[serde(rename = "amqp-in-manual-ack")]
    AmqpInManualAck,
}

impl NodeKind {
    pub fn consumes(&self) -> bool {
        !matches!(self, NodeKind::AmqpOut)
    }

    pub fn is_manual_ack(&self) -> bool {
        matches!(self, NodeKind::AmqpInManualAck)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Host: Send + Sync {
    /// Forwards a message to the node's output.
    fn send(&self, msg: NodeMessage);

    /// Reports an error, with structured detail when available.
    fn error(&self, text: &str, report: Option<ErrorReport>);

    fn status(&self, status: NodeStatus);

    fn log(&self, text: &str);
}
