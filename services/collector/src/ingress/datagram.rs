//! The datagram ingress (spec.md §4.2): one reassembled message per UDP
//! payload, framing handled by an external collaborator (the original
//! `sptp` receiver). Each payload MUST decode as a `CompactEvent` JSON;
//! malformed payloads are dropped with a debug log.

use std::io;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info};

use lc_protocol::CompactEvent;

use super::IngressContext;
use crate::dispatcher;

/// Largest datagram payload accepted by the framing collaborator. Mirrors
/// `MAX_VALUE_SIZE` on the resp ingress: a malformed or oversized reading
/// here is the framing layer's problem, not ours, but the buffer still has
/// to end somewhere.
const MAX_DATAGRAM_SIZE: usize = 1_048_576;

pub async fn run(bind: &str, ctx: Arc<IngressContext>, mut shutdown_rx: watch::Receiver<bool>) -> io::Result<()> {
    let socket = UdpSocket::bind(bind).await?;
    info!(bind, "datagram ingress listening");

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        // A read error after cancellation is a normal exit
                        // (spec.md §4.2); the shutdown branch above already
                        // raced this select, so re-check before logging.
                        if *shutdown_rx.borrow() {
                            return Ok(());
                        }
                        error!(error = %e, "datagram read error");
                        continue;
                    }
                };
                ingest_payload(&buf[..len], peer, &ctx).await;
            }
        }
    }
}

async fn ingest_payload(payload: &[u8], peer: std::net::SocketAddr, ctx: &IngressContext) {
    let event = match CompactEvent::from_json(payload) {
        Ok(c) => {
            let mut event = c.to_event();
            // spec.md §9 Open Question (b): the newest code never stamps
            // raw_size for compact events on this path. We choose the
            // permitted alternative and set it to the datagram length.
            event.raw_size = payload.len() as u64;
            event
        }
        Err(_) => {
            debug!(peer = %peer, "malformed datagram payload");
            ctx.stats.record_dropped();
            return;
        }
    };

    ctx.stats.record_accepted();
    let local_sink = ctx.local_sink.as_deref();
    let prior_queue = ctx.prior_queue.as_ref();
    if let Err(e) = dispatcher::dispatch(event, &ctx.dispatcher_cfg, local_sink, &ctx.standard_queue, prior_queue).await {
        error!(error = %e, "dispatch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    use lc_pipelines::PipelineOptions;
    use lc_queue::{Queue, QueueConfig};

    use crate::blocked::Blocked;
    use crate::config::DispatcherConfig;
    use crate::stats::Stats;

    async fn test_ctx() -> (StdArc<IngressContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _rx) = Queue::open("std", dir.path(), QueueConfig::default()).await.unwrap();
        let ctx = IngressContext {
            pipeline_opts: PipelineOptions::default(),
            dispatcher_cfg: DispatcherConfig {
                hostname: "collector-1".to_owned(),
                ..Default::default()
            },
            local_sink: None,
            standard_queue: queue,
            prior_queue: None,
            stats: Stats::new(),
            blocked: Blocked::new(),
        };
        (StdArc::new(ctx), dir)
    }

    #[tokio::test]
    async fn accepts_well_formed_compact_event_and_stamps_raw_size() {
        let (ctx, _dir) = test_ctx().await;
        let peer = "127.0.0.1:9999".parse().unwrap();
        let payload = br#"{"t":1546398245000,"h":"h","e":"test","p":"proj","o":"debug","c":"-","s":"","k":""}"#;
        ingest_payload(payload, peer, &ctx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctx.stats.accepted(), 1);
        assert_eq!(ctx.stats.dropped(), 0);
    }

    #[tokio::test]
    async fn drops_malformed_payload_without_panicking() {
        let (ctx, _dir) = test_ctx().await;
        let peer = "127.0.0.1:9999".parse().unwrap();
        ingest_payload(b"not json", peer, &ctx).await;
        assert_eq!(ctx.stats.dropped(), 1);
        assert_eq!(ctx.stats.accepted(), 0);
    }

    #[tokio::test]
    async fn shuts_down_cleanly_on_cancel_signal() {
        let (ctx, _dir) = test_ctx().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run("127.0.0.1:0", ctx, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "datagram ingress did not exit promptly on cancellation");
    }
}
