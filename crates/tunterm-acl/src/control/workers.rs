//! Parallel dataplane workers.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use super::snapshot::DataplaneSnapshot;
use crate::dataplane::{NextStage, PacketBuffer, RedirectCounters, RedirectNode, RedirectTrace};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("dataplane worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Packets of one batch after the redirect stage, in submission order.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub buffers: Vec<PacketBuffer>,
    pub nexts: Vec<NextStage>,
    pub traces: Vec<RedirectTrace>,
    pub counters: RedirectCounters,
}

/// Splits batches across blocking workers. Each worker reads the snapshot
/// current when the batch starts and keeps its own counters; they are
/// summed after the join.
pub struct WorkerPool {
    workers: usize,
    node: RedirectNode,
    snapshots: watch::Receiver<Arc<DataplaneSnapshot>>,
    totals: Mutex<RedirectCounters>,
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        node: RedirectNode,
        snapshots: watch::Receiver<Arc<DataplaneSnapshot>>,
    ) -> Self {
        Self {
            workers: workers.max(1),
            node,
            snapshots,
            totals: Mutex::new(RedirectCounters::default()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Counters accumulated over every batch so far.
    pub fn counters(&self) -> RedirectCounters {
        self.totals.lock().map(|t| *t).unwrap_or_default()
    }

    pub async fn process(&self, buffers: Vec<PacketBuffer>) -> Result<BatchResult, WorkerError> {
        if buffers.is_empty() {
            return Ok(BatchResult::default());
        }

        let snapshot = self.snapshots.borrow().clone();
        let chunk = buffers.len().div_ceil(self.workers);

        let mut rest = buffers;
        let mut chunks = Vec::with_capacity(self.workers);
        while rest.len() > chunk {
            let tail = rest.split_off(chunk);
            chunks.push(rest);
            rest = tail;
        }
        chunks.push(rest);

        let handles: Vec<_> = chunks
            .into_iter()
            .map(|mut frame| {
                let snapshot = Arc::clone(&snapshot);
                let node = self.node;
                tokio::task::spawn_blocking(move || {
                    let mut nexts = vec![NextStage::default(); frame.len()];
                    let mut traces = Vec::new();
                    let counters =
                        node.process_frame(snapshot.as_ref(), &mut frame, &mut nexts, &mut traces);
                    BatchResult {
                        buffers: frame,
                        nexts,
                        traces,
                        counters,
                    }
                })
            })
            .collect();

        let mut result = BatchResult::default();
        for handle in handles {
            let part = handle.await?;
            result.buffers.extend(part.buffers);
            result.nexts.extend(part.nexts);
            result.traces.extend(part.traces);
            result.counters.merge(&part.counters);
        }

        if let Ok(mut totals) = self.totals.lock() {
            totals.merge(&result.counters);
        }
        debug!(
            generation = snapshot.generation(),
            packets = result.buffers.len(),
            redirected = result.counters.redirected,
            "processed batch"
        );
        Ok(result)
    }
}
