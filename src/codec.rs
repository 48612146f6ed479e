// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Property and Header Codec
//!
//! Conversions between the JSON shaped properties and headers the host works
//! with and lapin's `BasicProperties` / `FieldTable`.

use crate::message::MessageProperties;
use lapin::{
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
    BasicProperties,
};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Converts a JSON object into an AMQP field table.
pub fn field_table(map: &Map<String, Value>) -> FieldTable {
    let mut btree = BTreeMap::<ShortString, AMQPValue>::default();
    for (key, value) in map {
        btree.insert(ShortString::from(key.clone()), amqp_value(value));
    }
    FieldTable::from(btree)
}

fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => AMQPValue::LongLongInt(i),
            (None, Some(f)) => AMQPValue::Double(f),
            _ => AMQPValue::Void,
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(amqp_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => AMQPValue::FieldTable(field_table(map)),
    }
}

/// Converts an AMQP field table into a JSON object.
pub fn json_map(table: &FieldTable) -> Map<String, Value> {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.to_string(), json_value(value)))
        .collect()
}

fn json_value(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(i) => Value::from(*i),
        AMQPValue::ShortShortUInt(i) => Value::from(*i),
        AMQPValue::ShortInt(i) => Value::from(*i),
        AMQPValue::ShortUInt(i) => Value::from(*i),
        AMQPValue::LongInt(i) => Value::from(*i),
        AMQPValue::LongUInt(i) => Value::from(*i),
        AMQPValue::LongLongInt(i) => Value::from(*i),
        AMQPValue::Timestamp(t) => Value::from(*t),
        AMQPValue::Float(f) => Number::from_f64(f64::from(*f)).map_or(Value::Null, Value::Number),
        AMQPValue::Double(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        AMQPValue::ShortString(s) => Value::String(s.to_string()),
        AMQPValue::LongString(s) => {
            Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            Value::Array(items.as_slice().iter().map(json_value).collect())
        }
        AMQPValue::FieldTable(table) => Value::Object(json_map(table)),
        _ => Value::Null,
    }
}

/// Converts host properties into lapin properties for publishing.
pub fn basic_properties(props: &MessageProperties) -> BasicProperties {
    let mut out = BasicProperties::default();
    if let Some(v) = &props.content_type {
        out = out.with_content_type(ShortString::from(v.clone()));
    }
    if let Some(v) = &props.content_encoding {
        out = out.with_content_encoding(ShortString::from(v.clone()));
    }
    if let Some(v) = &props.headers {
        out = out.with_headers(field_table(v));
    }
    if let Some(v) = props.delivery_mode {
        out = out.with_delivery_mode(v);
    }
    if let Some(v) = props.priority {
        out = out.with_priority(v);
    }
    if let Some(v) = &props.correlation_id {
        out = out.with_correlation_id(ShortString::from(v.clone()));
    }
    if let Some(v) = &props.reply_to {
        out = out.with_reply_to(ShortString::from(v.clone()));
    }
    if let Some(v) = &props.expiration {
        out = out.with_expiration(ShortString::from(v.clone()));
    }
    if let Some(v) = &props.message_id {
        out = out.with_message_id(ShortString::from(v.clone()));
    }
    if let Some(v) = props.timestamp {
        out = out.with_timestamp(v);
    }
    if let Some(v) = &props.kind {
        out = out.with_type(ShortString::from(v.clone()));
    }
    if let Some(v) = &props.user_id {
        out = out.with_user_id(ShortString::from(v.clone()));
    }
    if let Some(v) = &props.app_id {
        out = out.with_app_id(ShortString::from(v.clone()));
    }
    out
}

/// Converts the properties of a delivery into host properties.
pub fn message_properties(props: &BasicProperties) -> MessageProperties {
    let text = |v: &Option<ShortString>| v.as_ref().map(|s| s.to_string());

    MessageProperties {
        content_type: text(props.content_type()),
        content_encoding: text(props.content_encoding()),
        headers: props.headers().as_ref().map(json_map),
        delivery_mode: *props.delivery_mode(),
        priority: *props.priority(),
        correlation_id: text(props.correlation_id()),
        reply_to: text(props.reply_to()),
        expiration: text(props.expiration()),
        message_id: text(props.message_id()),
        timestamp: *props.timestamp(),
        kind: text(props.kind()),
        user_id: text(props.user_id()),
        app_id: text(props.app_id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn headers_survive_the_field_table() {
        let headers = json!({
            "x-match": "all",
            "retries": 3,
            "ratio": 0.5,
            "flag": true,
            "tags": ["a", "b"],
            "nested": {"k": "v"}
        });
        let map = headers.as_object().unwrap();

        assert_eq!(&json_map(&field_table(map)), map);
    }

    #[test]
    fn rpc_identifiers_are_carried_on_properties() {
        let props = MessageProperties {
            correlation_id: Some("abc".to_owned()),
            reply_to: Some("replies".to_owned()),
            kind: Some("order.created".to_owned()),
            delivery_mode: Some(2),
            ..Default::default()
        };

        let basic = basic_properties(&props);
        assert_eq!(basic.correlation_id().as_ref().map(|s| s.as_str()), Some("abc"));
        assert_eq!(basic.reply_to().as_ref().map(|s| s.as_str()), Some("replies"));
        assert_eq!(message_properties(&basic), props);
    }
}
