//! Verifies the back-pressure contract between the watermark monitor and
//! the resp ingress: once `Blocked` is set, new connections are accepted
//! at the socket level (so the listener itself never backs up) but then
//! dropped after a short delay without ever reading a command, instead of
//! being serviced normally.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

use collector::blocked::Blocked;
use collector::config::DispatcherConfig;
use collector::ingress::{self, IngressContext};
use collector::stats::Stats;
use lc_pipelines::PipelineOptions;
use lc_queue::{Queue, QueueConfig};

#[tokio::test]
async fn blocked_flag_causes_connections_to_be_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (standard_queue, _rx) = Queue::open("std", dir.path(), QueueConfig::default()).await.unwrap();

    let blocked = Blocked::new();
    blocked.set(true);

    let ctx = Arc::new(IngressContext {
        pipeline_opts: PipelineOptions::default(),
        dispatcher_cfg: DispatcherConfig::default(),
        local_sink: None,
        standard_queue,
        prior_queue: None,
        stats: Stats::new(),
        blocked: blocked.clone(),
    });

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let bind = addr.to_string();
    tokio::spawn(async move {
        let _ = ingress::resp::run(&bind, ctx, shutdown_rx).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 8];
    // The blocked path never writes a reply; the connection is simply
    // dropped after the refusal delay, which reads as a clean EOF here.
    let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("connection should close within the refusal delay")
        .unwrap();
    assert_eq!(n, 0, "blocked ingress must not service the connection");
}
