//! The canonical in-memory log record and its conversion to wire forms.
//!
//! Mirrors `types.Event` / `types.Op` from the original `logtubed` daemon:
//! a pipeline builds an `Event`, the dispatcher stamps `via` and routes it,
//! and `Event::to_op` is what actually gets written to the durable queue.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

use crate::op::Op;

/// `extra` carries arbitrary JSON-scalar structured data under short-string
/// keys. `serde_json::Value` already is the `{string, int64, float64, bool,
/// null, nested}` sum type the design calls for.
pub type ExtraMap = Map<String, Value>;

/// The canonical log record (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Millisecond precision is preserved because the offset is carried in
    /// the type; never zero once a pipeline has succeeded.
    pub timestamp: DateTime<FixedOffset>,
    pub hostname: String,
    pub env: String,
    pub project: String,
    pub topic: String,
    pub crid: String,
    pub crsrc: String,
    /// May be empty only when `extra` carries the structured payload.
    pub message: String,
    /// Comma-joined tags.
    pub keyword: String,
    /// Stamped by the dispatcher with the collector's own hostname.
    pub via: String,
    pub raw_size: u64,
    pub extra: ExtraMap,
}

impl Event {
    /// A freshly-zeroed event with `"noname"`/`"-"` placeholders, the shape
    /// every pipeline starts filling in.
    pub fn placeholder(timestamp: DateTime<FixedOffset>) -> Self {
        Event {
            timestamp,
            hostname: String::new(),
            env: String::new(),
            project: String::new(),
            topic: String::new(),
            crid: String::from("-"),
            crsrc: String::new(),
            message: String::new(),
            keyword: String::new(),
            via: String::new(),
            raw_size: 0,
            extra: ExtraMap::new(),
        }
    }

    /// spec.md §3 invariant: drop before the queue if topic/env/project are
    /// all empty.
    pub fn is_valid(&self) -> bool {
        !(self.topic.is_empty() && self.env.is_empty() && self.project.is_empty())
    }

    /// The destination bucket name: `"<topic>-<env>-YYYY-MM-DD"`, dated from
    /// `timestamp`'s own (fixed) offset — its "local representation".
    pub fn index(&self) -> String {
        format!(
            "{}-{}-{:04}-{:02}-{:02}",
            self.topic,
            self.env,
            self.timestamp.format("%Y"),
            self.timestamp.format("%m"),
            self.timestamp.format("%d"),
        )
    }

    /// Same as `index` but with the project segment included, for callers
    /// that need per-project uniqueness (kept for parity with the original
    /// `Event.FullIndex`, unused by the core pipeline itself).
    pub fn full_index(&self) -> String {
        format!(
            "{}-{}-{}-{:04}-{:02}-{:02}",
            self.topic,
            self.env,
            self.project,
            self.timestamp.format("%Y"),
            self.timestamp.format("%m"),
            self.timestamp.format("%d"),
        )
    }

    /// The flattened document JSON body sent to the search backend
    /// (spec.md §6): every `extra` key prefixed `x_`, empty `message`/
    /// `keyword` omitted.
    pub fn to_flattened_map(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (k, v) in &self.extra {
            out.insert(format!("x_{k}"), v.clone());
        }
        out.insert(
            "timestamp".to_owned(),
            Value::String(self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, false)),
        );
        out.insert("hostname".to_owned(), Value::String(self.hostname.clone()));
        out.insert("env".to_owned(), Value::String(self.env.clone()));
        out.insert("project".to_owned(), Value::String(self.project.clone()));
        out.insert("topic".to_owned(), Value::String(self.topic.clone()));
        out.insert("crid".to_owned(), Value::String(self.crid.clone()));
        out.insert("crsrc".to_owned(), Value::String(self.crsrc.clone()));
        out.insert("via".to_owned(), Value::String(self.via.clone()));
        out.insert("raw_size".to_owned(), Value::from(self.raw_size));
        if !self.keyword.is_empty() {
            out.insert("keyword".to_owned(), Value::String(self.keyword.clone()));
        }
        if !self.message.is_empty() {
            out.insert("message".to_owned(), Value::String(self.message.clone()));
        }
        out
    }

    /// Convert to the queue-level `Op`: `index` from `Event::index`, `body`
    /// the JSON-serialized flattened map.
    pub fn to_op(&self) -> Op {
        let body = serde_json::to_vec(&self.to_flattened_map()).unwrap_or_default();
        Op {
            index: self.index(),
            body,
        }
    }

    /// Join (and de-duplicate, preserving first-seen order) one or more
    /// marker-extracted keyword fragments, as the logtube pipelines do when
    /// combining `K[...]`/`KW[...]`/`KEYWORD[...]` markers.
    pub fn push_keyword(existing: &mut String, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if existing.is_empty() {
            existing.push_str(fragment);
        } else {
            existing.push(',');
            existing.push_str(fragment);
        }
    }

    /// Dedup a comma-joined keyword string while preserving order — used
    /// where multiple markers of the same kind might repeat a tag.
    pub fn dedup_keyword(raw: &str) -> String {
        let mut seen = HashSet::new();
        raw.split(',')
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(*s))
            .collect::<Vec<_>>()
            .join(",")
    }
}
