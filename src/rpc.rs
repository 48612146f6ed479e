// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RPC Coordinator
//!
//! In RPC mode every published request waits for its reply on a dedicated
//! reply queue. The coordinator declares that queue, subscribes to it and
//! races the deliveries against the reply timeout:
//!
//! - a reply with the expected correlation id is forwarded to the host and
//!   the reply queue is deleted;
//! - a reply with another correlation id is only noted, for diagnostics;
//! - if the timeout fires first the host receives a timeout message and the
//!   reply queue is deleted.
//!
//! The reply queue is deleted at most once per request.

use crate::{
    channel::{AmqpChannel, DeliveryStream},
    client::Amqp,
    configs::ClientConfig,
    consumer::deliver,
    errors::AmqpError,
    host::Host,
    message::{NodeMessage, RpcTimeout},
    topology::{AmqpTopology, Topology},
};
use futures_util::StreamExt;
use opentelemetry::global;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, error, warn};

/// Settings of the reply queue consumer derived from the requesting client.
pub fn derive_rpc_config(base: &ClientConfig, reply_to: &str) -> ClientConfig {
    let mut config = base.clone();
    config.exchange.name = String::new();
    config.queue.name = reply_to.to_owned();
    config.queue.exclusive = true;
    config.queue.auto_delete = true;
    config.queue.durable = false;
    config.no_ack = true;
    config
}

/// Bookkeeping of one outstanding request.
#[derive(Debug)]
pub struct RpcState {
    pub correlation_id: String,
    pub reply_to: String,
    deleted: AtomicBool,
    diagnostics: String,
}

impl RpcState {
    pub fn new(correlation_id: &str, reply_to: &str) -> RpcState {
        RpcState {
            correlation_id: correlation_id.to_owned(),
            reply_to: reply_to.to_owned(),
            deleted: AtomicBool::new(false),
            diagnostics: String::new(),
        }
    }

    /// Returns true exactly once: for the caller allowed to delete the queue.
    pub fn claim_deletion(&self) -> bool {
        self.deleted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn record_mismatch(&mut self, received: Option<&str>) {
        self.diagnostics.push_str(&format!(
            " Correlation ids do not match. Expecting: {}, received: {}",
            self.correlation_id,
            received.unwrap_or("none")
        ));
    }

    pub fn timeout_message(&self) -> String {
        format!("Timeout while waiting for RPC response.{}", self.diagnostics)
    }
}

impl Amqp {
    /// Prepares the reply consumer for a request about to be published.
    ///
    /// Failures are reported to the host; the request is published anyway.
    pub async fn handle_remote_procedure_call(&self, correlation_id: &str, reply_to: &str) {
        if let Err(err) = self.start_rpc(correlation_id, reply_to).await {
            error!(error = err.to_string(), reply_to, "failure to set up rpc reply consumer");
            self.host
                .error(&format!("Could not consume RPC message: {err}"), None);
        }
    }

    async fn start_rpc(&self, correlation_id: &str, reply_to: &str) -> Result<(), AmqpError> {
        let config = derive_rpc_config(&self.config, reply_to);
        let channel = self.channel().await?;

        let queue = AmqpTopology::new(channel.clone())
            .assert_queue(&config.queue)
            .await?;
        let deliveries = channel.basic_consume(&queue, config.no_ack).await?;
        debug!(queue = queue.as_str(), correlation_id, "waiting for rpc reply");

        let state = RpcState::new(correlation_id, &queue);
        let timeout = config.rpc_timeout();
        let mut waiters = self.rpc_waiters.lock().await;
        while waiters.try_join_next().is_some() {}
        waiters.spawn(await_reply(
            deliveries,
            channel,
            self.host.clone(),
            state,
            timeout,
            config,
        ));

        Ok(())
    }
}

/// Waits for the matching reply or the timeout, whichever comes first.
pub(crate) async fn await_reply(
    mut deliveries: DeliveryStream,
    channel: Arc<dyn AmqpChannel>,
    host: Arc<dyn Host>,
    mut state: RpcState,
    timeout: Duration,
    config: ClientConfig,
) {
    let tracer = global::tracer("amqp rpc");
    let timer = tokio::time::sleep(timeout);
    tokio::pin!(timer);
    let mut open = true;

    loop {
        tokio::select! {
            _ = &mut timer => {
                if state.claim_deletion() {
                    warn!(correlation_id = state.correlation_id.as_str(), "rpc reply timed out");
                    host.send(NodeMessage::RpcTimeout {
                        payload: RpcTimeout {
                            message: state.timeout_message(),
                            config,
                        },
                    });
                    delete_reply_queue(channel.as_ref(), host.as_ref(), &state.reply_to).await;
                }
                return;
            }
            next = deliveries.next(), if open => match next {
                Some(Ok(delivery)) => {
                    let received = delivery.properties.correlation_id.clone();
                    if received.as_deref() != Some(state.correlation_id.as_str()) {
                        state.record_mismatch(received.as_deref());
                        continue;
                    }

                    let forwarded =
                        deliver(&tracer, delivery, channel.as_ref(), host.as_ref(), false).await;
                    if let Err(err) = forwarded {
                        error!(error = err.to_string(), "error forwarding rpc reply");
                    }
                    if state.claim_deletion() {
                        delete_reply_queue(channel.as_ref(), host.as_ref(), &state.reply_to).await;
                    }
                    return;
                }
                Some(Err(err)) => error!(error = err.to_string(), "errors consume rpc reply"),
                None => open = false,
            }
        }
    }
}

async fn delete_reply_queue(channel: &dyn AmqpChannel, host: &dyn Host, queue: &str) {
    if let Err(err) = channel.queue_delete(queue).await {
        error!(error = err.to_string(), queue, "error deleting rpc queue");
        host.error(&format!("Could not delete RPC queue: {err}"), None);
    }
}
