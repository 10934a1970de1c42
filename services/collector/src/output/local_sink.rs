//! The local file sink (spec.md §4.7), grounded directly on
//! `internal/local_output.go`: one append-only file per index, a
//! handle cache capped so a long-running process doesn't leak file
//! descriptors across a long tail of distinct indices.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use lc_protocol::Event;

/// Above this many distinct open handles, the cache is dropped and
/// rebuilt from scratch rather than evicted piecewise.
const MAX_CACHED_HANDLES: usize = 2000;

#[derive(Debug, Error)]
pub enum LocalSinkError {
    #[error("local sink directory not set")]
    DirNotSet,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct LocalSink {
    dir: PathBuf,
    handles: Mutex<HashMap<String, File>>,
}

impl LocalSink {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, LocalSinkError> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(LocalSinkError::DirNotSet);
        }
        fs::create_dir_all(&dir).await?;
        Ok(LocalSink {
            dir,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Append `event`'s serialized line to its index file, opening or
    /// reusing a cached handle as needed.
    pub async fn write_event(&self, event: &Event) -> Result<(), LocalSinkError> {
        let index = event.index();
        let line = serialize_line(event);

        let mut handles = self.handles.lock().await;
        if !handles.contains_key(&index) && handles.len() >= MAX_CACHED_HANDLES {
            handles.clear();
        }
        if !handles.contains_key(&index) {
            let file = open_append(&self.dir, &index).await?;
            handles.insert(index.clone(), file);
        }
        let file = handles.get_mut(&index).expect("just inserted");
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Flush and drop every cached handle. Called once on shutdown.
    pub async fn close(&self) {
        self.handles.lock().await.clear();
    }
}

async fn open_append(dir: &Path, index: &str) -> std::io::Result<File> {
    let path = dir.join(format!("{index}.log"));
    OpenOptions::new().create(true).append(true).open(path).await
}

/// `"[<rfc3339>] (<crid>) [<keyword>] <message><extra>\r\n"`, `<extra>`
/// being `" k1 = v1, k2 = v2, ..."` when `event.extra` is non-empty and
/// omitted entirely otherwise.
fn serialize_line(event: &Event) -> String {
    let extra = if event.extra.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = event
            .extra
            .iter()
            .map(|(k, v)| format!("{k} = {}", value_to_plain(v)))
            .collect();
        format!(" {}", parts.join(", "))
    };
    format!(
        "[{}] ({}) [{}] {}{}\r\n",
        event.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
        event.crid,
        event.keyword,
        event.message,
        extra,
    )
}

fn value_to_plain(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use tokio::io::AsyncReadExt;

    fn event() -> Event {
        let ts = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2020, 1, 2, 3, 4, 5)
            .unwrap();
        let mut e = Event::placeholder(ts);
        e.topic = "debug".to_owned();
        e.env = "test".to_owned();
        e.project = "proj".to_owned();
        e.crid = "abc123".to_owned();
        e.keyword = "warn".to_owned();
        e.message = "disk usage high".to_owned();
        e
    }

    async fn read_index_file(dir: &Path, index: &str) -> String {
        let mut f = File::open(dir.join(format!("{index}.log"))).await.unwrap();
        let mut buf = String::new();
        f.read_to_string(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn writes_line_without_extra_block() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::open(dir.path()).await.unwrap();
        let e = event();
        sink.write_event(&e).await.unwrap();
        let contents = read_index_file(dir.path(), &e.index()).await;
        assert_eq!(contents, "[2020-01-02T03:04:05+00:00] (abc123) [warn] disk usage high\r\n");
    }

    #[tokio::test]
    async fn writes_extra_block_sorted_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::open(dir.path()).await.unwrap();
        let mut e = event();
        e.extra.insert("b".to_owned(), serde_json::Value::from(2));
        e.extra.insert("a".to_owned(), serde_json::Value::from("x"));
        sink.write_event(&e).await.unwrap();
        let contents = read_index_file(dir.path(), &e.index()).await;
        assert!(contents.ends_with(" a = x, b = 2\r\n"));
    }

    #[tokio::test]
    async fn reuses_handle_across_writes_to_same_index() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::open(dir.path()).await.unwrap();
        let e = event();
        sink.write_event(&e).await.unwrap();
        sink.write_event(&e).await.unwrap();
        let contents = read_index_file(dir.path(), &e.index()).await;
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(sink.handles.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn cache_resets_once_distinct_indices_exceed_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::open(dir.path()).await.unwrap();
        for n in 0..MAX_CACHED_HANDLES {
            let mut e = event();
            e.topic = format!("topic-{n}");
            sink.write_event(&e).await.unwrap();
        }
        assert_eq!(sink.handles.lock().await.len(), MAX_CACHED_HANDLES);

        let mut overflow = event();
        overflow.topic = "topic-overflow".to_owned();
        sink.write_event(&overflow).await.unwrap();
        assert_eq!(sink.handles.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn rejects_empty_directory() {
        let err = LocalSink::open("").await.unwrap_err();
        assert!(matches!(err, LocalSinkError::DirNotSet));
    }
}
