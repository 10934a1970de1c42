//! Short-key JSON wire form used by the datagram ingress and the legacy
//! `.compact` redis key suffix path.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Event, ExtraMap};

/// `CompactEvent`: `t,h,e,p,o,c,s,m,k,x`, `t` in milliseconds since epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactEvent {
    pub t: i64,
    #[serde(default)]
    pub h: String,
    #[serde(default)]
    pub e: String,
    #[serde(default)]
    pub p: String,
    pub o: String,
    #[serde(default)]
    pub c: String,
    #[serde(default)]
    pub s: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub m: String,
    #[serde(default)]
    pub k: String,
    #[serde(default, skip_serializing_if = "ExtraMap::is_empty")]
    pub x: ExtraMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactEventError;

impl std::fmt::Display for CompactEventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid compact event")
    }
}

impl std::error::Error for CompactEventError {}

impl CompactEvent {
    /// Parse from a JSON byte slice, trimming whitespace from the
    /// string fields and rejecting the record if `env`, `topic` and
    /// `project` are all empty once trimmed.
    pub fn from_json(buf: &[u8]) -> Result<Self, CompactEventError> {
        let mut c: CompactEvent = serde_json::from_slice(buf).map_err(|_| CompactEventError)?;
        c.h = c.h.trim().to_owned();
        c.e = c.e.trim().to_owned();
        c.o = c.o.trim().to_owned();
        c.p = c.p.trim().to_owned();
        if c.e.is_empty() && c.o.is_empty() && c.p.is_empty() {
            return Err(CompactEventError);
        }
        Ok(c)
    }

    /// Promote to the canonical `Event`. `t` is interpreted as a UTC
    /// instant at millisecond precision.
    pub fn to_event(&self) -> Event {
        let secs = self.t.div_euclid(1000);
        let millis = self.t.rem_euclid(1000);
        let utc = Utc
            .timestamp_opt(secs, (millis as u32) * 1_000_000)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
        let timestamp: DateTime<FixedOffset> = utc.with_timezone(&FixedOffset::east_opt(0).unwrap());
        Event {
            timestamp,
            hostname: self.h.clone(),
            env: self.e.clone(),
            project: self.p.clone(),
            topic: self.o.clone(),
            crid: self.c.clone(),
            crsrc: self.s.clone(),
            message: self.m.clone(),
            keyword: self.k.clone(),
            via: String::new(),
            raw_size: 0,
            extra: self.x.clone(),
        }
    }
}

/// The `(a) single JSON object` and `(b) V2.1 array form` payloads of the
/// logtube-native pipeline share this shape: `c,s,m,k,x` map to
/// crid/crsrc/message/keyword/extra. Mirrors the original `PartialEvent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialEvent {
    #[serde(default)]
    pub c: String,
    #[serde(default)]
    pub s: String,
    #[serde(default)]
    pub m: String,
    #[serde(default)]
    pub k: String,
    #[serde(default)]
    pub x: ExtraMap,
}

impl PartialEvent {
    pub fn from_json(v: &Value) -> Option<Self> {
        serde_json::from_value(v.clone()).ok()
    }
}
