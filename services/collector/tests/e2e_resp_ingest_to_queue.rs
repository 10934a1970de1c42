//! End-to-end: RESP ingress -> dispatcher -> standard disk queue.
//!
//! Drives the resp ingress the way a real shipper would (a raw RESP
//! `RPUSH` over TCP) and asserts the event comes out the other end of the
//! standard queue as a correctly-framed `Op`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use collector::blocked::Blocked;
use collector::config::DispatcherConfig;
use collector::ingress::{self, IngressContext};
use collector::stats::Stats;
use lc_pipelines::PipelineOptions;
use lc_protocol::Op;
use lc_queue::{Queue, QueueConfig};

async fn rpush(addr: std::net::SocketAddr, key: &str, value: &str) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let cmd = format!(
        "*3\r\n$5\r\nRPUSH\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        key.len(),
        key,
        value.len(),
        value
    );
    stream.write_all(cmd.as_bytes()).await.unwrap();
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b":0\r\n");
}

#[tokio::test]
async fn compact_event_travels_from_resp_ingress_to_standard_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (standard_queue, mut standard_rx) = Queue::open("std", dir.path(), QueueConfig::default()).await.unwrap();

    let ctx = Arc::new(IngressContext {
        pipeline_opts: PipelineOptions::default(),
        dispatcher_cfg: DispatcherConfig::default(),
        local_sink: None,
        standard_queue,
        prior_queue: None,
        stats: Stats::new(),
        blocked: Blocked::new(),
    });

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let bind = addr.to_string();
    let run_ctx = ctx.clone();
    let run_bind = bind.clone();
    tokio::spawn(async move {
        let _ = ingress::resp::run(&run_bind, run_ctx, shutdown_rx).await;
    });
    // Give the accept loop a moment to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let payload = r#"{"e":"prod","p":"checkout","o":"api","t":1700000000000,"m":"order placed"}"#;
    rpush(addr, "app.compact", payload).await;

    let bytes = tokio::time::timeout(Duration::from_secs(2), standard_rx.recv())
        .await
        .unwrap()
        .expect("standard queue produced an op");
    let op = Op::unmarshal(&bytes).unwrap();
    assert!(op.index.starts_with("checkout-prod-"));
    let body: serde_json::Value = serde_json::from_slice(&op.body).unwrap();
    assert_eq!(body["message"], "order placed");
    assert_eq!(body["raw_size"], payload.len());
}
