//! Priority dispatcher: a fixed pool of worker tasks executing packet handlers
//! off the connection read loops.
//!
//! Jobs are ordered by priority, then FIFO within a priority. For one packet,
//! connection-specific handlers run before global handlers, each group in
//! registration order. Handler errors and panics are logged and counted and
//! never reach the read loop.

use crate::connection::Connection;
use crate::core::packet::Packet;
use crate::core::pipeline::TransformPipeline;
use crate::protocol::handlers::HandlerSet;
use crate::utils::metrics::{Metrics, Timer};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

/// One received packet with the handlers to run for it, in order
pub(crate) struct DispatchJob {
    pub(crate) priority: Priority,
    pub(crate) packet: Packet,
    pub(crate) connection: Connection,
    pub(crate) handler_sets: Vec<HandlerSet>,
}

struct Queued {
    seq: u64,
    job: DispatchJob,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence number first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Queue {
    heap: Mutex<BinaryHeap<Queued>>,
    notify: Notify,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl Queue {
    fn pop(&self) -> Option<DispatchJob> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .map(|q| q.job)
    }
}

pub struct Dispatcher {
    queue: Arc<Queue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `worker_count` workers on `runtime`
    pub(crate) fn start(
        worker_count: usize,
        runtime: &Handle,
        pipeline: TransformPipeline,
        metrics: Arc<Metrics>,
    ) -> Self {
        let queue = Arc::new(Queue {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let queue = queue.clone();
                let pipeline = pipeline.clone();
                let metrics = metrics.clone();
                runtime.spawn(worker_loop(worker, queue, pipeline, metrics))
            })
            .collect();

        debug!(workers = worker_count.max(1), "Dispatcher started");
        Self {
            queue,
            workers: Mutex::new(workers),
        }
    }

    pub(crate) fn enqueue(&self, job: DispatchJob) {
        if self.queue.closed.load(Ordering::Acquire) {
            debug!(packet_type = job.packet.packet_type(), "Dispatcher stopped, dropping packet");
            return;
        }
        let seq = self.queue.seq.fetch_add(1, Ordering::Relaxed);
        self.queue
            .heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Queued { seq, job });
        self.queue.notify.notify_one();
    }

    /// Jobs waiting for a worker
    pub fn pending(&self) -> usize {
        self.queue
            .heap
            .lock()
            .map(|heap| heap.len())
            .unwrap_or(0)
    }

    /// Stop the workers and drop queued jobs
    pub(crate) fn shutdown(&self) {
        self.queue.closed.store(true, Ordering::Release);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            worker.abort();
        }
        self.queue
            .heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn worker_loop(worker: usize, queue: Arc<Queue>, pipeline: TransformPipeline, metrics: Arc<Metrics>) {
    loop {
        let job = loop {
            if let Some(job) = queue.pop() {
                break job;
            }
            if queue.closed.load(Ordering::Acquire) {
                return;
            }
            queue.notify.notified().await;
        };
        run_job(worker, job, &pipeline, &metrics).await;
    }
}

async fn run_job(worker: usize, job: DispatchJob, pipeline: &TransformPipeline, metrics: &Metrics) {
    let _timer = Timer::start("dispatch");
    let header = job.packet.header();
    let payload = job.packet.payload();

    for set in &job.handler_sets {
        for entry in &set.entries {
            let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
                entry.invoke(header, &job.connection, payload, &set.config, pipeline)
            }));

            let fut = match started {
                Ok(Ok(fut)) => fut,
                Ok(Err(e)) => {
                    warn!(worker, packet_type = header.packet_type(), error = %e, "Failed to decode packet for handler");
                    metrics.handler_failure();
                    continue;
                }
                Err(_) => {
                    error!(worker, packet_type = header.packet_type(), "Packet handler panicked");
                    metrics.handler_failure();
                    continue;
                }
            };

            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(worker, packet_type = header.packet_type(), connection = %job.connection, error = %e, "Packet handler failed");
                    metrics.handler_failure();
                }
                Err(_) => {
                    error!(worker, packet_type = header.packet_type(), "Packet handler panicked");
                    metrics.handler_failure();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Highest > Priority::AboveNormal);
        assert!(Priority::Normal > Priority::BelowNormal);
        assert!(Priority::BelowNormal > Priority::Lowest);
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
