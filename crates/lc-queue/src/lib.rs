//! The durable on-disk priority queue (spec.md §4.5): segment-file framing,
//! a sidecar metadata file for crash-safe resume, and the single-actor
//! `Queue` handle that ties them together.

pub mod metadata;
pub mod queue;
pub mod segment;

pub use metadata::Metadata;
pub use queue::{Queue, QueueConfig, QueueError};
pub use segment::{ReadOutcome, append_record, bad_segment_path, encode_record, read_record_at, segment_path};
