//! MySQL error-log pipeline: `fileset.module == "mysql" && fileset.name == "error"`.
//!
//! ```text
//! 2019-10-15T07:21:09.025737Z 0 [Warning] CA certificate ca.pem is self signed.
//! 2019-03-05 11:08:27 17054 [Note] /usr/local/mysql/bin/mysqld: ready for connections.
//! ```

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use lc_protocol::{BeatEnvelope, Event};
use regex::Regex;

struct MysqlFormat {
    regex: Regex,
    parse: fn(&str) -> Option<DateTime<FixedOffset>>,
}

fn parse_rfc3339_micros(ts: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(ts).ok()
}

fn parse_naive_seconds(ts: &str) -> Option<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").ok()?;
    Some(FixedOffset::east_opt(0).unwrap().from_utc_datetime(&naive))
}

fn formats() -> Vec<MysqlFormat> {
    vec![
        MysqlFormat {
            regex: Regex::new(
                r"^(?P<timestamp>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{6}.+?)\s+(?P<thread_id>\d+)\s+\[(?P<level>\w+)]\s+(?P<message>.+)$",
            )
            .unwrap(),
            parse: parse_rfc3339_micros,
        },
        MysqlFormat {
            regex: Regex::new(
                r"^(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\s+(?P<thread_id>\d+)\s+\[(?P<level>\w+)]\s+(?P<message>.+)$",
            )
            .unwrap(),
            parse: parse_naive_seconds,
        },
    ]
}

/// The pipeline's match predicate: `fileset.module == "mysql" && fileset.name == "error"`.
pub fn matches(envelope: &BeatEnvelope) -> bool {
    envelope.fileset.module == "mysql" && envelope.fileset.name == "error"
}

/// Run the MySQL error pipeline. Returns `None` on any parse failure or
/// when `level` is in `ignore_levels`.
pub fn process(envelope: &BeatEnvelope, ignore_levels: &HashSet<String>) -> Option<Event> {
    if !matches(envelope) {
        return None;
    }
    let message = envelope.message.trim();

    for fmt in formats() {
        let Some(caps) = fmt.regex.captures(message) else {
            continue;
        };
        let ts_str = &caps["timestamp"];
        let Some(timestamp) = (fmt.parse)(ts_str) else {
            continue;
        };
        let level = caps["level"].trim().to_ascii_lowercase();
        if ignore_levels.contains(&level) {
            return None;
        }
        let thread_id: i64 = caps["thread_id"].parse().unwrap_or(0);

        let mut event = Event::placeholder(timestamp);
        event.hostname = envelope.beat.hostname.clone();
        event.env = "noname".to_owned();
        event.project = "noname".to_owned();
        event.crid = "-".to_owned();
        event.topic = "x-mysql-error".to_owned();
        event.message = caps["message"].to_owned();
        event.extra.insert("file".to_owned(), envelope.source.clone().into());
        event.extra.insert("thread_id".to_owned(), thread_id.into());
        event.extra.insert("level".to_owned(), level.into());
        return Some(event);
    }
    None
}
