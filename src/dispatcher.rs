// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledgment Dispatcher
//!
//! Manual-ack nodes hand previously forwarded messages back with a
//! `manualAck` command attached. This module turns that command into the
//! matching channel primitive. Unset options default to acknowledging only
//! the given delivery and to requeueing negatively acknowledged ones.

use crate::{
    client::Amqp,
    errors::AmqpError,
    message::{AckMode, InboundMessage},
};
use tracing::debug;

fn all_up_to(msg: &InboundMessage) -> bool {
    msg.manual_ack
        .as_ref()
        .and_then(|ack| ack.all_up_to)
        .unwrap_or(false)
}

fn requeue(msg: &InboundMessage) -> bool {
    msg.manual_ack
        .as_ref()
        .and_then(|ack| ack.requeue)
        .unwrap_or(true)
}

impl Amqp {
    pub async fn ack(&self, msg: &InboundMessage) -> Result<(), AmqpError> {
        debug!(delivery_tag = msg.delivery_tag, "ack");
        self.channel()
            .await?
            .basic_ack(msg.delivery_tag, all_up_to(msg))
            .await
    }

    /// Acknowledges every outstanding delivery on the channel.
    pub async fn ack_all(&self) -> Result<(), AmqpError> {
        debug!("ack all");
        self.channel().await?.basic_ack(0, true).await
    }

    pub async fn nack(&self, msg: &InboundMessage) -> Result<(), AmqpError> {
        debug!(delivery_tag = msg.delivery_tag, "nack");
        self.channel()
            .await?
            .basic_nack(msg.delivery_tag, all_up_to(msg), requeue(msg))
            .await
    }

    /// Negatively acknowledges every outstanding delivery on the channel.
    pub async fn nack_all(&self, msg: &InboundMessage) -> Result<(), AmqpError> {
        debug!("nack all");
        self.channel().await?.basic_nack(0, true, requeue(msg)).await
    }

    pub async fn reject(&self, msg: &InboundMessage) -> Result<(), AmqpError> {
        debug!(delivery_tag = msg.delivery_tag, "reject");
        self.channel()
            .await?
            .basic_reject(msg.delivery_tag, requeue(msg))
            .await
    }

    /// Runs the acknowledgment the message asks for; plain messages are acked.
    pub async fn dispatch(&self, msg: &InboundMessage) -> Result<(), AmqpError> {
        let mode = msg
            .manual_ack
            .as_ref()
            .map(|ack| ack.ack_mode)
            .unwrap_or_default();

        match mode {
            AckMode::Ack => self.ack(msg).await,
            AckMode::AckAll => self.ack_all().await,
            AckMode::Nack => self.nack(msg).await,
            AckMode::NackAll => self.nack_all(msg).await,
            AckMode::Reject => self.reject(msg).await,
        }
    }
}
