//! The redis-dialect ingress (spec.md §4.1). Accept-loop shape grounded on
//! `forwarder::local_fanout::FanoutServer`: `bind`, then `loop { accept,
//! spawn one task per connection }`. The wire parser is a minimal subset
//! of RESP — arrays of bulk strings — since only `PING`/`QUIT`/`INFO`/
//! `RPUSH`/`LPUSH`/`LLEN` are ever sent by this daemon's shippers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lc_protocol::{BeatEnvelope, CompactEvent};

use super::IngressContext;
use crate::dispatcher;

/// Values above this are dropped silently (spec.md §8: exactly 1,000,000
/// bytes accepted, 1,000,001 dropped).
const MAX_VALUE_SIZE: usize = 1_000_000;
/// Values at or above this (and within the hard limit) are accepted but
/// logged.
const WARN_VALUE_SIZE: usize = 500_000;
/// Delay returned to a client refused while `blocked` is set, to damp
/// reconnect storms.
const BLOCKED_REFUSAL_DELAY: Duration = Duration::from_secs(1);

pub async fn run(bind: &str, ctx: Arc<IngressContext>, mut shutdown_rx: watch::Receiver<bool>) -> io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(bind, "resp ingress listening");

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                if ctx.blocked.is_blocked() {
                    tokio::spawn(async move {
                        tokio::time::sleep(BLOCKED_REFUSAL_DELAY).await;
                        drop(stream);
                    });
                    continue;
                }
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, ctx).await {
                        debug!(peer = %peer, error = %e, "resp connection closed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<IngressContext>) -> io::Result<()> {
    let _guard = ctx.stats.connection_opened(peer.ip());
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let command = match read_command(&mut reader).await? {
            Some(c) => c,
            None => return Ok(()),
        };
        if command.is_empty() {
            continue;
        }
        let name = String::from_utf8_lossy(&command[0]).to_ascii_uppercase();
        match name.as_str() {
            "PING" => write_simple(&mut writer, "PONG").await?,
            "QUIT" => {
                write_simple(&mut writer, "OK").await?;
                return Ok(());
            }
            "INFO" => write_bulk(&mut writer, "redis_version:2.4").await?,
            "RPUSH" | "LPUSH" => {
                if ctx.blocked.is_blocked() {
                    write_error(&mut writer, "blocked").await?;
                    continue;
                }
                if command.len() < 3 {
                    write_error(&mut writer, "wrong number of arguments").await?;
                    continue;
                }
                let key = String::from_utf8_lossy(&command[1]).into_owned();
                for value in &command[2..] {
                    ingest_value(&key, value, &ctx).await;
                }
                write_integer(&mut writer, 0).await?;
            }
            "LLEN" => write_integer(&mut writer, 0).await?,
            other => write_error(&mut writer, &format!("unknown command '{other}'")).await?,
        }
    }
}

async fn ingest_value(key: &str, value: &[u8], ctx: &IngressContext) {
    let len = value.len();
    if len > MAX_VALUE_SIZE {
        ctx.stats.record_size_rejected();
        return;
    }
    if len >= WARN_VALUE_SIZE {
        warn!(key, len, "oversized ingress value accepted");
    }

    let mut event = if key.ends_with(".compact") {
        match CompactEvent::from_json(value) {
            Ok(c) => c.to_event(),
            Err(_) => {
                debug!(key, "malformed compact event");
                ctx.stats.record_dropped();
                return;
            }
        }
    } else {
        let envelope: BeatEnvelope = match serde_json::from_slice(value) {
            Ok(e) => e,
            Err(_) => {
                debug!(key, "malformed beat envelope");
                ctx.stats.record_dropped();
                return;
            }
        };
        match lc_pipelines::run(&envelope, &ctx.pipeline_opts) {
            Some((_, event)) => event,
            None => {
                ctx.stats.record_dropped();
                return;
            }
        }
    };
    event.raw_size = value.len() as u64;

    ctx.stats.record_accepted();
    let local_sink = ctx.local_sink.as_deref();
    let prior_queue = ctx.prior_queue.as_ref();
    if let Err(e) = dispatcher::dispatch(event, &ctx.dispatcher_cfg, local_sink, &ctx.standard_queue, prior_queue).await {
        error!(error = %e, "dispatch failed");
    }
}

/// Read one RESP array-of-bulk-strings command. Returns `None` on a clean
/// EOF at a command boundary.
async fn read_command<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<Vec<u8>>>> {
    let mut header = String::new();
    if reader.read_line(&mut header).await? == 0 {
        return Ok(None);
    }
    let header = header.trim_end();
    if !header.starts_with('*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected RESP array"));
    }
    let count: usize = header[1..]
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad array length"))?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len_line = String::new();
        if reader.read_line(&mut len_line).await? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated command"));
        }
        let len_line = len_line.trim_end();
        if !len_line.starts_with('$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk string"));
        }
        let len: usize = len_line[1..]
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad bulk length"))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        args.push(buf);
    }
    Ok(Some(args))
}

async fn write_simple<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(format!("+{s}\r\n").as_bytes()).await
}

async fn write_error<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(format!("-ERR {s}\r\n").as_bytes()).await
}

async fn write_integer<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, n: i64) -> io::Result<()> {
    w.write_all(format!(":{n}\r\n").as_bytes()).await
}

async fn write_bulk<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(format!("${}\r\n{}\r\n", s.len(), s).as_bytes()).await
}
