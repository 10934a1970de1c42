//! The beat parsing pipelines: ordered parsers that turn a raw shipper
//! envelope into a canonical [`Event`], plus the small parsing helpers they
//! share (`compact_kv`, `markers`) and a standalone path-digest utility.
//!
//! Per the design note "pipelines as a variant", the registry below is a
//! fixed tagged enum run in match order rather than a `Vec<Box<dyn
//! Pipeline>>` — this keeps ordering explicit and allocations flat.

pub mod compact_kv;
pub mod digest;
pub mod logtube;
pub mod markers;
pub mod mysql;
pub mod nginx;

use std::collections::HashSet;

use lc_protocol::{BeatEnvelope, Event};
pub use logtube::LogtubeOptions;

/// Which registered pipeline a given envelope was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Mysql,
    Nginx,
    Logtube,
}

/// Configuration threaded through [`run`] for the pipelines that need it.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// `level` values the MySQL pipeline silently drops.
    pub mysql_ignore_levels: HashSet<String>,
    pub logtube: LogtubeOptions,
}

impl Default for LogtubeOptions {
    fn default() -> Self {
        LogtubeOptions { default_time_offset: 0 }
    }
}

/// Run the registered pipelines in match order — MySQL, then Nginx, then
/// the logtube-native fallback (always matches). Each pipeline's match
/// predicate is checked once: if a pipeline matches but its own processing
/// fails (malformed timestamp, ignored level, ...), that is a terminal
/// drop — the envelope does NOT cascade to the next pipeline.
pub fn run(envelope: &BeatEnvelope, opts: &PipelineOptions) -> Option<(PipelineKind, Event)> {
    if mysql::matches(envelope) {
        return mysql::process(envelope, &opts.mysql_ignore_levels).map(|e| (PipelineKind::Mysql, e));
    }
    if nginx::matches(envelope) {
        return nginx::process(envelope).map(|e| (PipelineKind::Nginx, e));
    }
    logtube::process(envelope, &opts.logtube).map(|e| (PipelineKind::Logtube, e))
}
