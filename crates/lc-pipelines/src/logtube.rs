//! Logtube-native pipeline: the fallback pipeline, always matches.
//!
//! ```text
//! V1:   [2018/09/10 17:24:22.120] CRID[945bea8e42de2796] this is a message
//! V2:   [2018-09-10 17:24:22.120 +0800] CRID[945bea8e42de2796] this is a message
//! V2.1: [2018-09-10 17:24:22.120 +0800] [{"c":"xxxxxxx"}] this is a message
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use lc_protocol::{BeatEnvelope, Event, PartialEvent};
use serde_json::Value;

use crate::markers::extract_markers;

pub struct LogtubeOptions {
    /// Hours to add to a successfully-parsed V1 timestamp, unless the
    /// message supplied its own `extra.timestamp`.
    pub default_time_offset: i64,
}

/// `[` at 0, `-`/`+` at offset-sign position, `]` closing — matches the V2
/// envelope shape without fully parsing the timestamp yet. Checked on raw
/// bytes, not `str` slices: `message` is untrusted UTF-8 and a fixed byte
/// offset is not guaranteed to land on a char boundary.
fn is_v2_message(raw: &str) -> bool {
    let b = raw.as_bytes();
    if b.len() < 31 {
        return false;
    }
    if b[0] != b'[' || b[30] != b']' {
        return false;
    }
    if b[5] != b'-' {
        return false;
    }
    b[25] == b'-' || b[25] == b'+'
}

fn decode_v2(raw: &str, event: &mut Event) -> bool {
    if raw.len() < 32 {
        return false;
    }
    // `.get` rather than direct indexing: a fixed byte offset into
    // untrusted UTF-8 can fall mid-char, and indexing there panics where
    // `get` just returns `None`.
    let Some(ts_str) = raw.get(1..30) else {
        return false;
    };
    let Ok(timestamp) = DateTime::parse_from_str(ts_str, "%Y-%m-%d %H:%M:%S%.3f %z") else {
        return false;
    };
    event.timestamp = timestamp;

    let Some(rest_raw) = raw.get(31..) else {
        return false;
    };
    let rest = rest_raw.trim();

    if rest.starts_with('{') && rest.ends_with('}') {
        let Ok(p) = serde_json::from_str::<PartialEvent>(rest) else {
            return false;
        };
        event.crid = p.c;
        event.crsrc = p.s;
        event.message = p.m;
        event.keyword = p.k;
        event.extra = p.x;
        return true;
    }

    if let Some(after_array) = rest.strip_prefix("[{") {
        let obj_end = match after_array.find('}') {
            Some(idx) => idx,
            None => return false,
        };
        let obj_json = format!("{{{}}}", &after_array[..obj_end]);
        let Ok(p) = serde_json::from_str::<PartialEvent>(&obj_json) else {
            return false;
        };
        let Some(close_bracket) = after_array[obj_end..].find(']') else {
            return false;
        };
        let trailing = after_array[obj_end + close_bracket + 1..].trim();
        event.crid = p.c;
        event.crsrc = p.s;
        event.keyword = p.k;
        event.extra = p.x;
        event.message = trailing.to_owned();
        return true;
    }

    let extracted = extract_markers(rest);
    if let Some(crid) = extracted.crid {
        event.crid = crid;
    }
    event.keyword = extracted.keyword;
    event.message = extracted.message;
    true
}

/// Returns `(no_offset, success)`: `no_offset` mirrors the original's
/// suppression of the hour-offset adjustment when `extra.timestamp` wins.
fn decode_v1(raw: &str, is_json_topic: bool, event: &mut Event) -> (bool, bool) {
    let bytes = raw.as_bytes();
    let mut i = 0usize;
    let expect = |buf: &[u8], i: &mut usize, allowed: &[u8]| -> bool {
        if *i < buf.len() && allowed.contains(&buf[*i]) {
            *i += 1;
            true
        } else {
            false
        }
    };
    let take_digits = |buf: &[u8], i: &mut usize, len: usize| -> Option<i64> {
        if *i + len > buf.len() {
            return None;
        }
        let s = std::str::from_utf8(&buf[*i..*i + len]).ok()?;
        let v: i64 = s.parse().ok()?;
        *i += len;
        Some(v)
    };

    if !expect(bytes, &mut i, b"[") {
        return (false, false);
    }
    let Some(yyyy) = take_digits(bytes, &mut i, 4) else {
        return (false, false);
    };
    if !expect(bytes, &mut i, b"-/") {
        return (false, false);
    }
    let Some(mm) = take_digits(bytes, &mut i, 2) else {
        return (false, false);
    };
    if !expect(bytes, &mut i, b"-/") {
        return (false, false);
    }
    let Some(dd) = take_digits(bytes, &mut i, 2) else {
        return (false, false);
    };
    if !expect(bytes, &mut i, b" \t") {
        return (false, false);
    }
    let Some(hh) = take_digits(bytes, &mut i, 2) else {
        return (false, false);
    };
    if !expect(bytes, &mut i, b":") {
        return (false, false);
    }
    let Some(mi) = take_digits(bytes, &mut i, 2) else {
        return (false, false);
    };
    if !expect(bytes, &mut i, b":") {
        return (false, false);
    }
    let Some(ss) = take_digits(bytes, &mut i, 2) else {
        return (false, false);
    };
    if !expect(bytes, &mut i, b".") {
        return (false, false);
    }
    let Some(sss) = take_digits(bytes, &mut i, 3) else {
        return (false, false);
    };
    if !expect(bytes, &mut i, b"]") {
        return (false, false);
    }

    let Some(date) = NaiveDate::from_ymd_opt(yyyy as i32, mm as u32, dd as u32) else {
        return (false, false);
    };
    let Some(naive_time) = date.and_hms_milli_opt(hh as u32, mi as u32, ss as u32, sss as u32) else {
        return (false, false);
    };
    event.timestamp = FixedOffset::east_opt(0).unwrap().from_utc_datetime(&naive_time);

    let remaining = raw[i..].trim();

    if is_json_topic {
        let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(remaining) else {
            return (false, false);
        };
        let Some(Value::String(topic)) = map.remove("topic") else {
            return (false, false);
        };
        event.topic = topic;
        if let Some(Value::String(project)) = map.remove("project") {
            if !project.trim().is_empty() {
                event.project = project.trim().to_owned();
            }
        }
        if let Some(Value::String(crid)) = map.remove("crid") {
            if !crid.trim().is_empty() {
                event.crid = crid.trim().to_owned();
            }
        }
        let mut no_offset = false;
        if let Some(Value::String(ts)) = map.get("timestamp").cloned() {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(ts.trim()) {
                event.timestamp = parsed;
                no_offset = true;
                map.remove("timestamp");
            }
        }
        event.extra = map;
        event.message.clear();
        (no_offset, true)
    } else {
        let extracted = extract_markers(remaining);
        if let Some(crid) = extracted.crid {
            event.crid = crid;
        }
        event.keyword = extracted.keyword;
        event.message = extracted.message;
        (false, true)
    }
}

/// `source` decoding shared by the pipeline entry point: last path
/// component, if dot-separated with >3 fields, supplies env/topic/project
/// directly; otherwise the last three non-empty path components do, with
/// the project further truncated at its first dot.
fn decode_source(raw: &str, event: &mut Event) -> bool {
    let components: Vec<&str> = raw.trim().split('/').collect();
    let filename = match components.last() {
        Some(f) => *f,
        None => return false,
    };
    let fn_splits: Vec<&str> = filename.split('.').collect();
    if fn_splits.len() > 3 {
        event.env = fn_splits[0].to_owned();
        event.topic = fn_splits[1].to_owned();
        event.project = fn_splits[2].to_owned();
        return true;
    }
    let non_empty: Vec<&str> = components.iter().copied().filter(|s| !s.is_empty()).collect();
    if non_empty.len() < 3 {
        return false;
    }
    let n = non_empty.len();
    event.env = non_empty[n - 3].to_owned();
    event.topic = non_empty[n - 2].to_owned();
    event.project = non_empty[n - 1].to_owned();
    if let Some(idx) = event.project.find('.') {
        event.project.truncate(idx);
    }
    true
}

/// Run the logtube-native pipeline (always matches, run as the fallback).
pub fn process(envelope: &BeatEnvelope, opts: &LogtubeOptions) -> Option<Event> {
    let placeholder_ts = FixedOffset::east_opt(0).unwrap().from_utc_datetime(&Utc::now().naive_utc());
    let mut event = Event::placeholder(placeholder_ts);
    event.hostname = envelope.beat.hostname.clone();

    if !decode_source(&envelope.source, &mut event) {
        return None;
    }

    let message = envelope.message.trim();

    if is_v2_message(message) {
        if !decode_v2(message, &mut event) {
            return None;
        }
    } else {
        let is_json_topic = event.topic.contains("_json_");
        let (no_offset, ok) = decode_v1(message, is_json_topic, &mut event);
        if !ok {
            return None;
        }
        if !no_offset {
            event.timestamp = event.timestamp + chrono::Duration::hours(opts.default_time_offset);
        }
    }

    Some(event)
}
