//! `Op`: the queue-level record and its bit-exact wire framing.
//!
//! Framing: `[0xAC][0xCF][index-len:u16 BE][index][body-len:u32 BE][body]`.
//! This is a documented on-disk contract (other tooling reads the queue
//! files directly), not an implementation detail — the byte layout must
//! never drift even if the in-memory `Op` shape does.

use std::fmt;

const MAGIC: [u8; 2] = [0xAC, 0xCF];

/// The serialized form the durable queue stores and the bulk committer
/// replays: one index action, `index` the destination bucket name and
/// `body` the already-JSON-encoded flattened document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub index: String,
    pub body: Vec<u8>,
}

/// Failure modes of [`Op::unmarshal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// Fewer bytes than the smallest possible valid record.
    Truncated,
    /// The leading two bytes were not `0xAC 0xCF`.
    BadMagic,
    /// `index` bytes were not valid UTF-8.
    InvalidIndex,
    /// `index` is longer than `u16::MAX` bytes and cannot be framed.
    IndexTooLong,
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpError::Truncated => write!(f, "op record truncated"),
            OpError::BadMagic => write!(f, "op record missing magic bytes"),
            OpError::InvalidIndex => write!(f, "op index is not valid utf-8"),
            OpError::IndexTooLong => write!(f, "op index exceeds 65535 bytes"),
        }
    }
}

impl std::error::Error for OpError {}

impl Op {
    pub fn new(index: impl Into<String>, body: Vec<u8>) -> Self {
        Op {
            index: index.into(),
            body,
        }
    }

    /// Encode per the framing above.
    pub fn marshal(&self) -> Result<Vec<u8>, OpError> {
        let index_bytes = self.index.as_bytes();
        if index_bytes.len() > u16::MAX as usize {
            return Err(OpError::IndexTooLong);
        }
        let mut out = Vec::with_capacity(2 + 2 + index_bytes.len() + 4 + self.body.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&(index_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(index_bytes);
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Decode per the framing above. Rejects anything not starting with
    /// the magic bytes, per spec.
    pub fn unmarshal(buf: &[u8]) -> Result<Self, OpError> {
        if buf.len() < 2 {
            return Err(OpError::Truncated);
        }
        if buf[0..2] != MAGIC {
            return Err(OpError::BadMagic);
        }
        if buf.len() < 4 {
            return Err(OpError::Truncated);
        }
        let index_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let index_start = 4;
        let index_end = index_start + index_len;
        if buf.len() < index_end + 4 {
            return Err(OpError::Truncated);
        }
        let index = std::str::from_utf8(&buf[index_start..index_end])
            .map_err(|_| OpError::InvalidIndex)?
            .to_owned();
        let body_len_start = index_end;
        let body_len = u32::from_be_bytes([
            buf[body_len_start],
            buf[body_len_start + 1],
            buf[body_len_start + 2],
            buf[body_len_start + 3],
        ]) as usize;
        let body_start = body_len_start + 4;
        let body_end = body_start + body_len;
        if buf.len() < body_end {
            return Err(OpError::Truncated);
        }
        Ok(Op {
            index,
            body: buf[body_start..body_end].to_vec(),
        })
    }

    /// Total on-wire size of this record once marshalled.
    pub fn encoded_len(&self) -> usize {
        2 + 2 + self.index.len() + 4 + self.body.len()
    }
}
