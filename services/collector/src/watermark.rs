//! The watermark / block monitor (spec.md §4.8), grounded on
//! `core/block_routine.go`: a periodic loop that computes disk usage under
//! each configured directory, checks a sentinel file, and publishes the
//! resulting `blocked` boolean to every registered blockable. This repo
//! has exactly one blockable (the resp ingress's shared [`Blocked`] flag),
//! so "publish to every registered blockable" collapses to one `set`.

use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, warn};

use crate::blocked::Blocked;
use crate::config::WatermarkConfig;

const BLOCK_SENTINEL_TOKEN: &str = "BLOCK";

/// Run the monitor loop until `shutdown_rx` fires. Tier 1 of the shutdown
/// cascade (spec.md §5): the monitor stops on cancel without flushing
/// anything, since it owns no durable state.
pub async fn run(cfg: &WatermarkConfig, blocked: Blocked, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let should_block = tick(cfg).await;
                blocked.set(should_block);
            }
        }
    }
}

/// One evaluation of the watermark + sentinel checks, independent of the
/// loop's scheduling — exercised directly by tests.
async fn tick(cfg: &WatermarkConfig) -> bool {
    for dir_cfg in &cfg.dirs {
        match directory_usage_gb(Path::new(&dir_cfg.path)).await {
            Ok(usage_gb) => {
                if usage_gb >= dir_cfg.watermark_gb {
                    error!(
                        dir = %dir_cfg.path,
                        usage_gb,
                        watermark_gb = dir_cfg.watermark_gb,
                        "watermark exceeded"
                    );
                    return true;
                }
            }
            Err(e) => {
                warn!(dir = %dir_cfg.path, error = %e, "failed to compute directory usage");
            }
        }
    }

    if sentinel_blocks(&cfg.sentinel_path).await {
        warn!(sentinel = %cfg.sentinel_path, "sentinel file forces blocked state");
        return true;
    }

    false
}

async fn sentinel_blocks(path: &str) -> bool {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents.contains(BLOCK_SENTINEL_TOKEN),
        Err(_) => false,
    }
}

/// Recursive byte-usage walk of `dir`, converted to GiB.
async fn directory_usage_gb(dir: &Path) -> std::io::Result<f64> {
    let bytes = walk_bytes(dir).await?;
    Ok(bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

fn walk_bytes(dir: &Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<u64>> + Send + '_>> {
    Box::pin(async move {
        let mut total = 0u64;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                total += walk_bytes(&entry.path()).await?;
            } else {
                total += meta.len();
            }
        }
        Ok(total)
    })
}
