// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! This module propagates trace context through AMQP message headers. Outgoing
//! messages get the current context injected into their headers; every
//! delivery gets a consumer span whose parent is extracted from its headers.
//! Nothing is injected unless the application installs a global propagator.

use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// An adapter for injecting and extracting OpenTelemetry context from headers.
pub(crate) struct HeaderPropagator<'a> {
    headers: &'a mut Map<String, Value>,
}

impl<'a> HeaderPropagator<'a> {
    pub(crate) fn new(headers: &'a mut Map<String, Value>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderPropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), Value::String(value));
    }
}

impl Extractor for HeaderPropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(Value::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Injects the current trace context into `headers`.
pub(crate) fn inject_current(headers: &mut Map<String, Value>) {
    let ctx = Context::current();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderPropagator::new(headers))
    });
}

/// Creates a consumer span for a delivery, parented on the context carried by
/// its headers.
pub(crate) fn new_span(
    headers: Option<&Map<String, Value>>,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = headers.cloned().unwrap_or_default();
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderPropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagator_reads_back_injected_keys() {
        let mut headers = Map::new();
        let mut propagator = HeaderPropagator::new(&mut headers);
        propagator.set("TraceParent", "00-abc-def-01".to_owned());

        assert_eq!(propagator.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(propagator.keys(), vec!["traceparent"]);
    }

    #[test]
    fn noop_propagator_injects_nothing() {
        let mut headers = Map::new();
        inject_current(&mut headers);
        assert!(headers.is_empty());
    }
}
