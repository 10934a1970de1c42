//! The sidecar metadata file: `depth`, `(readFileNum, readPos)`,
//! `(writeFileNum, writePos)` as three newline-terminated lines
//! (spec.md §6). Rewritten atomically (write-then-rename).

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub depth: i64,
    pub read_file_num: u64,
    pub read_pos: u64,
    pub write_file_num: u64,
    pub write_pos: u64,
}

impl Metadata {
    pub fn to_text(&self) -> String {
        format!(
            "{}\n{},{}\n{},{}\n",
            self.depth, self.read_file_num, self.read_pos, self.write_file_num, self.write_pos
        )
    }

    pub fn from_text(text: &str) -> Option<Metadata> {
        let mut lines = text.lines();
        let depth: i64 = lines.next()?.trim().parse().ok()?;
        let (read_file_num, read_pos) = parse_pair(lines.next()?)?;
        let (write_file_num, write_pos) = parse_pair(lines.next()?)?;
        Some(Metadata {
            depth,
            read_file_num,
            read_pos,
            write_file_num,
            write_pos,
        })
    }

    /// Read the metadata file at `path`. Returns `None` if it is missing or
    /// unreadable — per spec.md §4.5 the reader then resumes from the start
    /// of the lowest segment, accepting potential re-delivery.
    pub async fn load(path: &Path) -> Option<Metadata> {
        let text = tokio::fs::read_to_string(path).await.ok()?;
        Metadata::from_text(&text)
    }

    /// Write-then-rename so a crash mid-write never leaves a torn metadata
    /// file behind.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let tmp_path = path.with_extension("meta.tmp");
        tokio::fs::write(&tmp_path, self.to_text()).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

fn parse_pair(line: &str) -> Option<(u64, u64)> {
    let (a, b) = line.trim().split_once(',')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_text() {
        let m = Metadata {
            depth: 12,
            read_file_num: 0,
            read_pos: 1024,
            write_file_num: 1,
            write_pos: 2048,
        };
        let text = m.to_text();
        assert_eq!(Metadata::from_text(&text), Some(m));
    }

    #[test]
    fn from_text_rejects_malformed_lines() {
        assert_eq!(Metadata::from_text("not a number\n0,0\n0,0\n"), None);
        assert_eq!(Metadata::from_text("0\nmissing-comma\n0,0\n"), None);
    }

    #[tokio::test]
    async fn load_returns_none_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.meta");
        assert!(Metadata::load(&path).await.is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.meta");
        let m = Metadata {
            depth: 3,
            read_file_num: 2,
            read_pos: 10,
            write_file_num: 2,
            write_pos: 40,
        };
        m.save(&path).await.unwrap();
        assert_eq!(Metadata::load(&path).await, Some(m));
    }
}
