//! In-process job queue
//!
//! Includes:
//! - One priority heap per partition (higher priority first, FIFO among equals)
//! - tokio workers pulling from a partition, ttr enforced per job
//! - Connection state so producers can exercise their retry and fallback paths

use dashmap::DashMap;
use log::{error, info, warn};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use super::options::{JobOptions, JobPayload, Partition};
use super::transport::{JobHandler, JobOutcome, JobTicket, JobTransport};
use crate::common::errors::TransportError;

const CONNECTED: u8 = 0;
const DISCONNECTED: u8 = 1;
const UNAVAILABLE: u8 = 2;
const CLOSED: u8 = 3;

struct QueuedJob {
    priority: i32,
    sequence: u64,
    handler: String,
    payload: JobPayload,
    ttr: Duration,
    reply: oneshot::Sender<JobOutcome>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // Max-heap: higher priority first, then lower sequence (older) first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct PartitionQueue {
    heap: Mutex<BinaryHeap<QueuedJob>>,
    notify: Notify,
}

impl PartitionQueue {
    fn push(&self, job: QueuedJob) {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueuedJob> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Default)]
struct Inner {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
    fix: PartitionQueue,
    flux: PartitionQueue,
    state: AtomicU8,
    sequence: AtomicU64,
    /// Accepted but not yet finished
    pending: AtomicUsize,
    idle: Notify,
}

impl Inner {
    fn partition(&self, partition: Partition) -> &PartitionQueue {
        match partition {
            Partition::Fix => &self.fix,
            Partition::Flux => &self.flux,
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Cheap to clone; every clone talks to the same queue.
#[derive(Clone, Default)]
pub struct LocalQueue {
    inner: Arc<Inner>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, name: &str, handler: Arc<dyn JobHandler>) {
        self.inner.handlers.insert(name.to_string(), handler);
    }

    /// Spawn `count` workers for `partition` on the current tokio runtime.
    pub fn start_workers(&self, partition: Partition, count: usize) -> Vec<JoinHandle<()>> {
        info!("Starting {} {} worker(s)", count, partition);
        (0..count)
            .map(|index| {
                let inner = self.inner.clone();
                tokio::spawn(worker_loop(inner, partition, index))
            })
            .collect()
    }

    /// Queued (not yet started) jobs in `partition`.
    pub fn queued(&self, partition: Partition) -> usize {
        self.inner.partition(partition).len()
    }

    /// Resolves once every accepted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drop the connection; producers see `ConnectionLost` until `reconnect`.
    pub fn disconnect(&self) {
        let _ = self.inner.state.compare_exchange(
            CONNECTED,
            DISCONNECTED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Refuse work with `Unavailable`; `reconnect` does not help.
    pub fn set_unavailable(&self, unavailable: bool) {
        let (from, to) = if unavailable {
            (CONNECTED, UNAVAILABLE)
        } else {
            (UNAVAILABLE, CONNECTED)
        };
        let _ = self
            .inner
            .state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Stop accepting jobs for good and stop idle workers. Queued jobs are still drained.
    pub fn close(&self) {
        self.inner.state.store(CLOSED, Ordering::SeqCst);
        self.inner.fix.notify.notify_waiters();
        self.inner.flux.notify.notify_waiters();
    }
}

impl JobTransport for LocalQueue {
    fn run(
        &self,
        handler: &str,
        payload: JobPayload,
        options: &JobOptions,
    ) -> Result<JobTicket, TransportError> {
        match self.inner.state.load(Ordering::SeqCst) {
            DISCONNECTED => return Err(TransportError::ConnectionLost),
            UNAVAILABLE => return Err(TransportError::Unavailable),
            CLOSED => return Err(TransportError::Closed),
            _ => {}
        }
        if !self.inner.handlers.contains_key(handler) {
            return Err(TransportError::UnknownHandler(handler.to_string()));
        }

        let (reply, ticket) = JobTicket::channel();
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        self.inner.partition(options.queue).push(QueuedJob {
            priority: options.priority,
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst),
            handler: handler.to_string(),
            payload,
            ttr: options.ttr,
            reply,
        });
        Ok(ticket)
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        match self.inner.state.compare_exchange(
            DISCONNECTED,
            CONNECTED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) | Err(CONNECTED) => Ok(()),
            Err(UNAVAILABLE) => Err(TransportError::Unavailable),
            Err(_) => Err(TransportError::Closed),
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, partition: Partition, index: usize) {
    loop {
        let notified = inner.partition(partition).notify.notified();
        match inner.partition(partition).pop() {
            Some(job) => {
                run_job(&inner, job).await;
                inner.finish_one();
            }
            None if inner.state.load(Ordering::SeqCst) == CLOSED => {
                info!("{} worker {} stopped", partition, index);
                return;
            }
            None => notified.await,
        }
    }
}

async fn run_job(inner: &Inner, job: QueuedJob) {
    let Some(handler) = inner.handlers.get(&job.handler).map(|h| h.value().clone()) else {
        let _ = job.reply.send(JobOutcome::Lost(format!("no handler `{}`", job.handler)));
        return;
    };

    let start_time = Instant::now();
    let payload = job.payload.clone();
    let work = tokio::task::spawn_blocking(move || handler.handle(&payload));
    let outcome = match tokio::time::timeout(job.ttr, work).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            error!(
                "Job {} for media {} version `{}` crashed: {}",
                job.handler, job.payload.media_id, job.payload.version, join_error
            );
            JobOutcome::Lost(join_error.to_string())
        }
        Err(_) => {
            warn!(
                duration = &*format!("{:?}", start_time.elapsed());
                "Job {} for media {} version `{}` exceeded its ttr of {:?}",
                job.handler, job.payload.media_id, job.payload.version, job.ttr
            );
            JobOutcome::Lost(format!("time-to-run of {:?} exceeded", job.ttr))
        }
    };
    let _ = job.reply.send(outcome);
}
