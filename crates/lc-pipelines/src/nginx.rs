//! Nginx access-log pipeline: `fileset.module == "nginx" && fileset.name == "access"`.
//!
//! `[11/Mar/2020:19:03:53+0800 style iso8601] r=GET /x HTTP/1.1|s=200|rt=0.012`

use chrono::{DateTime, FixedOffset};
use lc_protocol::{BeatEnvelope, Event};
use serde_json::Value;

use crate::compact_kv::{CompactKv, ValueType};

fn tag_registry() -> CompactKv {
    let mut ckv = CompactKv::new();
    ckv.add("bbs", "body_bytes_sent", ValueType::Integer);
    ckv.add("hh", "http_host", ValueType::String);
    ckv.add("hr", "http_referer", ValueType::String);
    ckv.add("hua", "http_user_agent", ValueType::String);
    ckv.add("hxff", "http_x_forwarded_for", ValueType::String);
    ckv.add("r", "request", ValueType::String);
    ckv.add("ra", "remote_addr", ValueType::String);
    ckv.add("rt", "request_time", ValueType::Float);
    ckv.add("s", "status", ValueType::Integer);
    ckv.add("ua", "upstream_addr", ValueType::String);
    ckv.add("urt", "upstream_response_time", ValueType::Float);
    ckv
}

fn is_seconds_field(name: &str) -> bool {
    matches!(name, "request_time" | "upstream_response_time")
}

/// The pipeline's match predicate: `fileset.module == "nginx" && fileset.name == "access"`.
pub fn matches(envelope: &BeatEnvelope) -> bool {
    envelope.fileset.module == "nginx" && envelope.fileset.name == "access"
}

/// Run the nginx access pipeline. Returns `None` on any parse failure.
pub fn process(envelope: &BeatEnvelope) -> Option<Event> {
    if !matches(envelope) {
        return None;
    }
    let message = &envelope.message;
    let lb = message.find('[')?;
    let rb = message.find(']')?;
    if lb > rb {
        return None;
    }
    let timestamp: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(&message[lb + 1..rb]).ok()?;

    let mut event = Event::placeholder(timestamp);
    event.topic = "x-nginx-access".to_owned();
    event.hostname = envelope.beat.hostname.clone();
    event.env = "noname".to_owned();
    event.project = "noname".to_owned();
    event.crid = "-".to_owned();
    event.extra.insert("file".to_owned(), envelope.source.clone().into());

    let registry = tag_registry();
    let parsed = registry.parse(&message[rb + 1..]);
    for (name, value) in parsed {
        if is_seconds_field(&name) {
            if let Some(secs) = value.as_f64() {
                event.extra.insert(name, Value::from((secs * 1000.0) as i64));
            }
        } else if name == "request" {
            if let Some(request) = value.as_str() {
                let splits: Vec<&str> = request.splitn(3, ' ').collect();
                if splits.len() == 3 {
                    event.extra.insert("method".to_owned(), Value::String(splits[0].to_owned()));
                    event.extra.insert("path".to_owned(), Value::String(splits[1].to_owned()));
                    event.extra.insert("protocol".to_owned(), Value::String(splits[2].to_owned()));
                }
            }
        } else {
            event.extra.insert(name, value);
        }
    }

    Some(event)
}
