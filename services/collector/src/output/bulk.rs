//! The bulk indexer output (spec.md §4.6): one batcher task plus a pool of
//! committer tasks per configured backend. Grounded on
//! `forwarder::local_fanout`'s channel-fan-out shape, generalized from
//! broadcast (many readers, same data) to a worker pool (one reader per
//! batch, load-shared via a shared `mpsc::Receiver`).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use lc_protocol::Op;

use crate::config::BulkConfig;

/// One failing item from a bulk response, keyed by its position in the
/// submitted batch.
#[derive(Debug, Clone)]
pub struct BulkItemFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BulkResponse {
    pub failures: Vec<BulkItemFailure>,
}

#[derive(Debug, Error)]
pub enum BulkSubmitError {
    #[error("bulk output shut down")]
    Cancelled,
    #[error("backend error: {0}")]
    Backend(String),
}

/// A committable destination for a batch of Ops. Connection-level retry
/// (spec.md §4.6: "retried by the backend client's exponential backoff")
/// lives inside the implementation, not in the committer loop above it.
pub trait BulkBackend: Send + Sync + 'static {
    fn submit(
        &self,
        batch: &[Op],
    ) -> impl std::future::Future<Output = Result<BulkResponse, BulkSubmitError>> + Send;
}

const RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_SAMPLED_FAILURES: usize = 5;

/// Handle to a running batcher + committer pool. Dropping it does not stop
/// the pool; shutdown is driven by the shared `watch` signal passed at
/// spawn time (spec.md §5 cancellation tiers).
pub struct BulkOutput {
    op_tx: mpsc::Sender<Op>,
}

impl BulkOutput {
    pub fn spawn<B: BulkBackend>(backend: B, cfg: &BulkConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        let (op_tx, op_rx) = mpsc::channel(cfg.batch_size.max(1) * 4);
        let (batch_tx, batch_rx) = mpsc::channel(cfg.committers.max(1) * 2);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let backend = Arc::new(backend);

        tokio::spawn(batcher_loop(
            op_rx,
            batch_tx,
            cfg.batch_size.max(1),
            Duration::from_secs(cfg.batch_timeout_secs.max(1)),
            shutdown_rx.clone(),
        ));

        for id in 0..cfg.committers.max(1) {
            tokio::spawn(committer_loop(
                id,
                backend.clone(),
                batch_rx.clone(),
                cfg.ignored_errors.clone(),
                shutdown_rx.clone(),
            ));
        }

        BulkOutput { op_tx }
    }

    /// `consumeOp`: hand one Op to the output. Blocks only on the internal
    /// channel filling up, which is the backpressure point described in
    /// spec.md §5.
    pub async fn consume_op(&self, op: Op) -> Result<(), BulkSubmitError> {
        self.op_tx.send(op).await.map_err(|_| BulkSubmitError::Cancelled)
    }
}

async fn batcher_loop(
    mut op_rx: mpsc::Receiver<Op>,
    batch_tx: mpsc::Sender<Vec<Op>>,
    batch_size: usize,
    batch_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut batch: Vec<Op> = Vec::with_capacity(batch_size);
    let deadline = tokio::time::sleep(batch_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    if !batch.is_empty() {
                        let _ = batch_tx.send(std::mem::take(&mut batch)).await;
                    }
                    return;
                }
            }
            maybe_op = op_rx.recv() => {
                match maybe_op {
                    Some(op) => {
                        batch.push(op);
                        if batch.len() >= batch_size {
                            let _ = batch_tx.send(std::mem::take(&mut batch)).await;
                            deadline.as_mut().reset(Instant::now() + batch_timeout);
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            let _ = batch_tx.send(std::mem::take(&mut batch)).await;
                        }
                        return;
                    }
                }
            }
            _ = &mut deadline => {
                if !batch.is_empty() {
                    let _ = batch_tx.send(std::mem::take(&mut batch)).await;
                }
                deadline.as_mut().reset(Instant::now() + batch_timeout);
            }
        }
    }
}

async fn committer_loop<B: BulkBackend>(
    id: usize,
    backend: Arc<B>,
    batch_rx: Arc<Mutex<mpsc::Receiver<Vec<Op>>>>,
    ignored_errors: HashSet<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let batch = {
            let mut rx = batch_rx.lock().await;
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
                maybe = rx.recv() => maybe,
            }
        };
        let Some(mut batch) = batch else { return };

        loop {
            match backend.submit(&batch).await {
                Ok(resp) if resp.failures.is_empty() => {
                    debug!(committer = id, n = batch.len(), "bulk batch committed");
                    break;
                }
                Ok(resp) => {
                    for f in resp.failures.iter().take(MAX_SAMPLED_FAILURES) {
                        error!(committer = id, item = f.index, reason = %f.reason, "bulk item failed");
                    }
                    let retry: Vec<Op> = resp
                        .failures
                        .iter()
                        .filter(|f| !ignored_errors.contains(&f.reason))
                        .filter_map(|f| batch.get(f.index).cloned())
                        .collect();
                    if retry.is_empty() {
                        break;
                    }
                    warn!(committer = id, n = retry.len(), "retrying failed bulk items");
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return;
                            }
                        }
                    }
                    batch = retry;
                }
                Err(BulkSubmitError::Cancelled) => return,
                Err(e) => {
                    error!(committer = id, error = %e, "bulk submit failed, dropping batch");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingBackend {
        submitted: AsyncMutex<Vec<Vec<Op>>>,
        fail_once_for: Option<String>,
        failed_already: AtomicUsize,
    }

    impl BulkBackend for Arc<RecordingBackend> {
        async fn submit(&self, batch: &[Op]) -> Result<BulkResponse, BulkSubmitError> {
            self.submitted.lock().await.push(batch.to_vec());
            if let Some(target) = &self.fail_once_for {
                if self.failed_already.fetch_add(1, Ordering::SeqCst) == 0 {
                    if let Some(pos) = batch.iter().position(|op| &op.index == target) {
                        return Ok(BulkResponse {
                            failures: vec![BulkItemFailure { index: pos, reason: "timeout".to_owned() }],
                        });
                    }
                }
            }
            Ok(BulkResponse::default())
        }
    }

    fn op(index: &str) -> Op {
        Op::new(index.to_owned(), format!("{{\"topic\":\"{index}\"}}").into_bytes())
    }

    #[tokio::test]
    async fn batches_and_commits_in_order() {
        let backend = Arc::new(RecordingBackend {
            submitted: AsyncMutex::new(Vec::new()),
            fail_once_for: None,
            failed_already: AtomicUsize::new(0),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = BulkConfig {
            backend_url: "http://x".to_owned(),
            batch_size: 3,
            batch_timeout_secs: 60,
            committers: 1,
            ignored_errors: HashSet::new(),
        };
        let output = BulkOutput::spawn(backend.clone(), &cfg, shutdown_rx);
        for i in 0..3 {
            output.consume_op(op(&format!("idx-{i}"))).await.unwrap();
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let submitted = backend.submitted.lock().await;
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].len(), 3);
        assert_eq!(submitted[0][0].index, "idx-0");
        assert_eq!(submitted[0][2].index, "idx-2");
    }

    #[tokio::test]
    async fn retries_failing_item_after_delay() {
        let backend = Arc::new(RecordingBackend {
            submitted: AsyncMutex::new(Vec::new()),
            fail_once_for: Some("idx-1".to_owned()),
            failed_already: AtomicUsize::new(0),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = BulkConfig {
            backend_url: "http://x".to_owned(),
            batch_size: 2,
            batch_timeout_secs: 60,
            committers: 1,
            ignored_errors: HashSet::new(),
        };
        tokio::time::pause();
        let output = BulkOutput::spawn(backend.clone(), &cfg, shutdown_rx);
        output.consume_op(op("idx-0")).await.unwrap();
        output.consume_op(op("idx-1")).await.unwrap();
        tokio::time::advance(StdDuration::from_millis(10)).await;
        {
            let submitted = backend.submitted.lock().await;
            assert_eq!(submitted.len(), 1);
        }
        tokio::time::advance(RETRY_DELAY + StdDuration::from_secs(1)).await;
        tokio::task::yield_now().await;
        let submitted = backend.submitted.lock().await;
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].len(), 1);
        assert_eq!(submitted[1][0].index, "idx-1");
    }
}
