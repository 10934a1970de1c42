//! `logcollectord`: the log-event collector and indexer daemon (spec.md §1).
//!
//! Wires the four core subsystems — ingress, dispatcher, durable queue,
//! bulk indexer output — plus the ambient local file sink and watermark
//! monitor, behind a single typed [`config::CollectorConfig`].

pub mod blocked;
pub mod config;
pub mod dispatcher;
pub mod ingress;
pub mod output;
pub mod stats;
pub mod stats_http;
pub mod watermark;
