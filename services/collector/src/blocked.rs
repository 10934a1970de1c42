//! The process-wide `blocked` flag (spec.md §9 Design Notes): a
//! single-writer atomic boolean. The watermark monitor is the sole writer;
//! ingresses read it on every new connection and before every push.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Blocked(Arc<AtomicBool>);

impl Blocked {
    pub fn new() -> Self {
        Blocked(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_blocked(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Relaxed);
    }
}
