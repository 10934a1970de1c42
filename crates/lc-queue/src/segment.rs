//! One queue segment file: a sequence of `[length:i32 big-endian][payload
//! bytes]` records (spec.md §4.5). Segment file names embed a monotonic
//! sequence number.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// `{dir}/{name}.diskqueue.{file_num:010}.dat`
pub fn segment_path(dir: &Path, name: &str, file_num: u64) -> PathBuf {
    dir.join(format!("{name}.diskqueue.{file_num:010}.dat"))
}

pub fn bad_segment_path(dir: &Path, name: &str, file_num: u64) -> PathBuf {
    dir.join(format!("{name}.diskqueue.{file_num:010}.dat.bad"))
}

/// Encode one record: 4-byte big-endian length prefix followed by `payload`.
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Outcome of attempting to read one record at a given offset.
pub enum ReadOutcome {
    /// A full record was read; `new_pos` is the offset immediately after it.
    Record { payload: Vec<u8>, new_pos: u64 },
    /// No complete record available yet at `pos` (clean end of what's been
    /// written so far — not necessarily end of file).
    Incomplete,
    /// The length prefix at `pos` is outside `[min_msg_size, max_msg_size]`:
    /// the segment is corrupt from this point on.
    Corrupt,
}

/// Read one record from `file` at byte offset `pos`, without mutating any
/// caller-visible state — the caller commits `new_pos` only once the record
/// has been handed off downstream.
pub async fn read_record_at(
    file: &mut File,
    pos: u64,
    min_msg_size: u32,
    max_msg_size: u32,
) -> std::io::Result<ReadOutcome> {
    file.seek(SeekFrom::Start(pos)).await?;
    let mut len_buf = [0u8; 4];
    if let Err(e) = file.read_exact(&mut len_buf).await {
        return if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Ok(ReadOutcome::Incomplete)
        } else {
            Err(e)
        };
    }
    let len = i32::from_be_bytes(len_buf);
    if len < 0 || (len as u32) < min_msg_size || (len as u32) > max_msg_size {
        return Ok(ReadOutcome::Corrupt);
    }
    let mut payload = vec![0u8; len as usize];
    if let Err(e) = file.read_exact(&mut payload).await {
        return if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Ok(ReadOutcome::Incomplete)
        } else {
            Err(e)
        };
    }
    Ok(ReadOutcome::Record {
        payload,
        new_pos: pos + 4 + len as u64,
    })
}

/// Append a pre-encoded record to the active write file and return its
/// encoded length.
pub async fn append_record(file: &mut File, encoded: &[u8]) -> std::io::Result<u64> {
    file.write_all(encoded).await?;
    Ok(encoded.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::fs::OpenOptions;

    async fn open_rw(path: &Path) -> File {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn writes_and_reads_back_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), "std", 0);
        let mut file = open_rw(&path).await;
        let encoded = encode_record(b"hello");
        append_record(&mut file, &encoded).await.unwrap();

        match read_record_at(&mut file, 0, 1, 1024).await.unwrap() {
            ReadOutcome::Record { payload, new_pos } => {
                assert_eq!(payload, b"hello");
                assert_eq!(new_pos, encoded.len() as u64);
            }
            _ => panic!("expected a record"),
        }
    }

    #[tokio::test]
    async fn reading_past_written_data_is_incomplete_not_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), "std", 0);
        let mut file = open_rw(&path).await;
        let encoded = encode_record(b"x");
        append_record(&mut file, &encoded).await.unwrap();

        match read_record_at(&mut file, encoded.len() as u64, 1, 1024).await.unwrap() {
            ReadOutcome::Incomplete => {}
            _ => panic!("expected incomplete"),
        }
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), "std", 0);
        let mut file = open_rw(&path).await;
        file.write_all(&100_000_000i32.to_be_bytes()).await.unwrap();

        match read_record_at(&mut file, 0, 1, 1024).await.unwrap() {
            ReadOutcome::Corrupt => {}
            _ => panic!("expected corrupt"),
        }
    }
}
