// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Client
//!
//! This module provides the error taxonomy used across the crate. `AmqpError`
//! covers transport, topology, publish, acknowledgment and teardown failures.
//! Transport failures carry a `ConnectFailure` classification so the reconnect
//! state machine can tell a rejected login apart from a refused connection.

use serde::Serialize;
use thiserror::Error;

/// Classification of a failure to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectFailure {
    /// The broker rejected the credentials. Retrying will not help.
    InvalidLogin,
    /// Nothing is listening on the broker address.
    ConnectionRefused,
    /// Any other transport failure.
    Other,
}

/// Represents errors that can occur during AMQP operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the broker
    #[error("failure to connect `{1}`")]
    ConnectionError(ConnectFailure, String),

    /// An operation required a live connection or channel
    #[error("not connected")]
    NotConnected,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error removing a queue binding
    #[error("failure to unbind queue `{1}` from exchange `{0}`")]
    UnbindingError(String, String),

    /// Error deleting a queue
    #[error("failure to delete queue `{0}`")]
    DeleteQueueError(String),

    /// Error declaring a consumer
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error closing a channel or connection
    #[error("failure to close `{0}`")]
    CloseError(String),

    /// Host supplied configuration could not be read
    #[error("invalid configuration `{0}`")]
    InvalidConfig(String),
}

impl AmqpError {
    /// Returns the connect failure classification for transport errors.
    pub fn connect_failure(&self) -> Option<ConnectFailure> {
        match self {
            AmqpError::ConnectionError(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

/// Where an error reported to the host originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorLocation {
    ConnectError,
    ConnectionErrorEvent,
    ChannelErrorEvent,
}

/// Structured detail attached to an error surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub location: Option<ErrorLocation>,
}

impl ErrorReport {
    pub fn new(error: impl ToString, location: ErrorLocation) -> Self {
        ErrorReport {
            error: error.to_string(),
            location: Some(location),
        }
    }
}
