//! Wire types shared by the collector's ingress, pipeline and queue layers:
//! the canonical `Event`, the queue-level `Op` and its bit-exact framing,
//! and the two JSON-on-the-wire forms pipelines and ingresses consume
//! (`CompactEvent`, `BeatEnvelope`).

pub mod beat_envelope;
pub mod compact_event;
pub mod event;
pub mod op;

pub use beat_envelope::{BeatEnvelope, Fileset, SourceParts};
pub use compact_event::{CompactEvent, CompactEventError, PartialEvent};
pub use event::{Event, ExtraMap};
pub use op::{Op, OpError};
