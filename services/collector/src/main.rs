// logcollectord: accepts log events from remote shippers, normalizes them
// into canonical records, persists them in a durable on-disk queue and
// forwards batches to a search backend (spec.md §1).

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use collector::blocked::Blocked;
use collector::config::{self, CollectorConfig};
use collector::ingress::{self, IngressContext};
use collector::output::{BulkOutput, HttpBulkBackend, LocalSink};
use collector::stats::Stats;
use collector::stats_http::{self, StatsHttpState};
use collector::watermark;
use lc_protocol::Op;
use lc_queue::{Queue, QueueConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "logcollectord starting");

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cfg).await {
        error!(error = %e, "logcollectord exited with error");
        std::process::exit(1);
    }
    info!("logcollectord shut down gracefully");
}

async fn run(cfg: CollectorConfig) -> std::io::Result<()> {
    let pipeline_opts = lc_pipelines::PipelineOptions {
        mysql_ignore_levels: cfg.mysql.ignore_levels.clone(),
        logtube: lc_pipelines::LogtubeOptions {
            default_time_offset: cfg.logtube.default_time_offset,
        },
    };

    let standard_queue_cfg = QueueConfig {
        max_bytes_per_file: cfg.standard_queue.max_bytes_per_file,
        sync_every: cfg.standard_queue.sync_every,
        sync_interval: std::time::Duration::from_secs(cfg.standard_queue.sync_interval_secs),
        ..QueueConfig::default()
    };
    let (standard_queue, standard_rx) = Queue::open(
        cfg.standard_queue.name.clone(),
        cfg.standard_queue.dir.clone(),
        standard_queue_cfg,
    )
    .await?;

    let prior = match (&cfg.prior_queue, &cfg.prior_bulk) {
        (Some(q), Some(b)) => {
            let qcfg = QueueConfig {
                max_bytes_per_file: q.max_bytes_per_file,
                sync_every: q.sync_every,
                sync_interval: std::time::Duration::from_secs(q.sync_interval_secs),
                ..QueueConfig::default()
            };
            let (queue, rx) = Queue::open(q.name.clone(), q.dir.clone(), qcfg).await?;
            Some((queue, rx, b.clone()))
        }
        _ => None,
    };
    let prior_queue = prior.as_ref().map(|(q, _, _)| q.clone());

    let local_sink = match &cfg.local_sink {
        Some(s) => Some(Arc::new(LocalSink::open(s.dir.clone()).await.map_err(to_io_error)?)),
        None => None,
    };

    let blocked = Blocked::new();
    let stats = Stats::new();

    // Tier 3: bulk outputs. Spawned first so ops accumulated from the
    // queues have somewhere to drain to; shut down last (spec.md §5).
    let (tier3_tx, tier3_rx) = watch::channel(false);
    let standard_backend = HttpBulkBackend::new(cfg.standard_bulk.backend_url.clone());
    let standard_bulk = BulkOutput::spawn(standard_backend, &cfg.standard_bulk, tier3_rx.clone());
    let prior_bulk = prior
        .as_ref()
        .map(|(_, _, bcfg)| BulkOutput::spawn(HttpBulkBackend::new(bcfg.backend_url.clone()), bcfg, tier3_rx.clone()));

    tokio::spawn(drain_queue_into_bulk(standard_rx, standard_bulk));
    if let Some((_, rx, _)) = prior {
        tokio::spawn(drain_queue_into_bulk(rx, prior_bulk.expect("constructed above")));
    }

    // Tier 2: queues + local sink. Closed after tier 1 stops producing.
    let standard_queue_for_close = standard_queue.clone();
    let prior_queue_for_close = prior_queue.clone();
    let local_sink_for_close = local_sink.clone();

    let ctx = Arc::new(IngressContext {
        pipeline_opts,
        dispatcher_cfg: cfg.dispatcher.clone(),
        local_sink: local_sink.clone(),
        standard_queue: standard_queue.clone(),
        prior_queue: prior_queue.clone(),
        stats: stats.clone(),
        blocked: blocked.clone(),
    });

    // Tier 1: ingresses + watermark monitor.
    let (tier1_tx, tier1_rx) = watch::channel(false);
    let resp_bind = cfg.resp.bind.clone();
    let resp_ctx = ctx.clone();
    let resp_handle = tokio::spawn(async move { ingress::resp::run(&resp_bind, resp_ctx, tier1_rx.clone()).await });

    let datagram_bind = cfg.datagram.bind.clone();
    let datagram_ctx = ctx.clone();
    let datagram_handle = tokio::spawn(async move { ingress::datagram::run(&datagram_bind, datagram_ctx, tier1_rx.clone()).await });

    let watermark_cfg = cfg.watermark.clone();
    let watermark_blocked = blocked.clone();
    let watermark_handle = tokio::spawn(async move { watermark::run(&watermark_cfg, watermark_blocked, tier1_rx.clone()).await });

    let stats_http_state = StatsHttpState {
        standard_queue: standard_queue.clone(),
        prior_queue: prior_queue.clone(),
        stats: stats.clone(),
        blocked: blocked.clone(),
    };
    let stats_bind = cfg.stats_http.bind.clone();
    let stats_http_handle = tokio::spawn(async move { stats_http::run(&stats_bind, stats_http_state, tier1_rx.clone()).await });

    shutdown_signal().await;
    info!("shutdown signal received, entering tiered drain");

    // Tier 1: stop accepting new work.
    let _ = tier1_tx.send(true);
    let _ = resp_handle.await;
    let _ = datagram_handle.await;
    let _ = watermark_handle.await;
    let _ = stats_http_handle.await;
    info!("tier 1 (ingresses, watermark, stats http) stopped");

    // Tier 2: flush queues and the local sink to disk.
    standard_queue_for_close.close().await;
    if let Some(q) = &prior_queue_for_close {
        q.close().await;
    }
    if let Some(sink) = &local_sink_for_close {
        sink.close().await;
    }
    info!("tier 2 (queues, local sink) flushed");

    // Tier 3: flush the last in-flight bulk batch.
    let _ = tier3_tx.send(true);
    info!("tier 3 (bulk outputs) signalled to drain");

    Ok(())
}

/// Forward ops dequeued from a disk queue's read channel to a bulk output.
/// Exits once the queue's channel closes (the queue was closed).
async fn drain_queue_into_bulk(mut rx: tokio::sync::mpsc::Receiver<Vec<u8>>, bulk: BulkOutput) {
    while let Some(bytes) = rx.recv().await {
        match Op::unmarshal(&bytes) {
            Ok(op) => {
                if bulk.consume_op(op).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "dropping unparseable queue record");
            }
        }
    }
}

fn to_io_error(e: impl std::error::Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), the two signals spec.md §6 names
/// as initiating tiered shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C"); },
        _ = terminate => { info!("received SIGTERM"); },
    }
}
