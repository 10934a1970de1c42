pub mod datagram;
pub mod resp;

use std::sync::Arc;

use lc_pipelines::PipelineOptions;
use lc_queue::Queue;

use crate::blocked::Blocked;
use crate::config::DispatcherConfig;
use crate::output::LocalSink;
use crate::stats::Stats;

/// The shared state both ingresses dispatch through. One instance is built
/// in `main` and cloned (cheaply, it's all `Arc`/handle types) into every
/// accept loop and connection task.
pub struct IngressContext {
    pub pipeline_opts: PipelineOptions,
    pub dispatcher_cfg: DispatcherConfig,
    pub local_sink: Option<Arc<LocalSink>>,
    pub standard_queue: Queue,
    pub prior_queue: Option<Queue>,
    pub stats: Stats,
    pub blocked: Blocked,
}
