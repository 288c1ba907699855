//! Fixed-size pool of tokio tasks draining [`BatchWorker`] pending sets

use super::error::{SchedulerError, SchedulerResult};
use super::metrics::SCHEDULER_METRICS;
use super::work::{BatchWorker, IndexWork};
use crate::config::IndexingConfig;
use futures::FutureExt;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct WorkerSlot {
    worker: Arc<dyn BatchWorker>,
    pending: HashSet<IndexWork>,
    /// In the ready queue
    queued: bool,
    /// A batch is executing
    running: bool,
}

#[derive(Default)]
struct PoolState {
    workers: HashMap<String, WorkerSlot>,
    /// (priority, ready sequence, worker name)
    ready: BinaryHeap<Reverse<(u32, u64, String)>>,
    next_seq: u64,
    active: usize,
    shutdown: bool,
}

impl PoolState {
    fn enqueue(&mut self, name: &str, priority: u32) {
        self.ready
            .push(Reverse((priority, self.next_seq, name.to_string())));
        self.next_seq += 1;
    }

    fn is_idle(&self) -> bool {
        self.active == 0 && self.ready.is_empty()
    }
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Notify,
    idle: Notify,
}

/// Runs submitted work on a fixed number of tokio tasks
pub struct BatchWorkManager {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
}

impl BatchWorkManager {
    /// Spawn `pool_size` pool tasks on the current tokio runtime
    pub fn new(pool_size: usize) -> Arc<Self> {
        let pool_size = pool_size.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            work_available: Notify::new(),
            idle: Notify::new(),
        });

        let handles = (0..pool_size)
            .map(|slot| tokio::spawn(run_pool_task(Arc::clone(&shared), slot)))
            .collect();

        info!(pool_size, "Batch work manager started");

        Arc::new(Self {
            shared,
            handles: Mutex::new(handles),
            pool_size,
        })
    }

    pub fn from_config(config: &IndexingConfig) -> Arc<Self> {
        Self::new(config.worker_pool_size)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Add `work` to the pending set of `worker`.
    ///
    /// Work already pending is collapsed. The worker becomes ready unless a
    /// batch of it is queued or running; a running worker picks up the new
    /// work in its next batch.
    pub fn submit(&self, worker: &Arc<dyn BatchWorker>, work: IndexWork) -> SchedulerResult<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(SchedulerError::ShutDown);
        }

        let name = worker.name().to_string();
        let priority = worker.priority();
        let slot = state
            .workers
            .entry(name.clone())
            .or_insert_with(|| WorkerSlot {
                worker: Arc::clone(worker),
                pending: HashSet::new(),
                queued: false,
                running: false,
            });
        slot.worker = Arc::clone(worker);
        slot.pending.insert(work);

        if !slot.queued && !slot.running {
            slot.queued = true;
            state.enqueue(&name, priority);
            drop(state);
            self.shared.work_available.notify_one();
        }
        Ok(())
    }

    /// Number of pending work items of a worker
    pub fn pending_count(&self, worker_name: &str) -> usize {
        self.shared
            .state
            .lock()
            .workers
            .get(worker_name)
            .map(|slot| slot.pending.len())
            .unwrap_or(0)
    }

    /// Resolve once no batch is queued or running
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work and wait for the pool tasks to exit.
    ///
    /// Running batches complete; queued batches are dropped.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.ready.clear();
            for slot in state.workers.values_mut() {
                slot.queued = false;
            }
        }
        self.shared.work_available.notify_waiters();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Pool task terminated abnormally");
            }
        }
        self.shared.idle.notify_waiters();
        info!("Batch work manager shut down");
    }
}

impl Drop for BatchWorkManager {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}

async fn run_pool_task(shared: Arc<PoolShared>, slot_index: usize) {
    loop {
        let notified = shared.work_available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = {
            let mut state = shared.state.lock();
            if state.shutdown {
                return;
            }
            match state.ready.pop() {
                Some(Reverse((_, _, name))) => {
                    let more_ready = !state.ready.is_empty();
                    let batch = state.workers.get_mut(&name).map(|slot| {
                        slot.queued = false;
                        slot.running = true;
                        let works: Vec<IndexWork> = slot.pending.drain().collect();
                        (Arc::clone(&slot.worker), works)
                    });
                    if batch.is_some() {
                        state.active += 1;
                    }
                    if more_ready {
                        shared.work_available.notify_one();
                    }
                    batch.map(|(worker, works)| (name, worker, works))
                }
                None => None,
            }
        };

        let Some((name, worker, works)) = next else {
            notified.await;
            continue;
        };

        run_batch(&name, worker, works, slot_index).await;

        let mut state = shared.state.lock();
        state.active -= 1;
        let shutdown = state.shutdown;
        let requeue = match state.workers.get_mut(&name) {
            Some(slot) => {
                slot.running = false;
                if !slot.pending.is_empty() && !shutdown {
                    slot.queued = true;
                    Some(slot.worker.priority())
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(priority) = requeue {
            state.enqueue(&name, priority);
            shared.work_available.notify_one();
        }
        if state.is_idle() {
            shared.idle.notify_waiters();
        }
    }
}

async fn run_batch(name: &str, worker: Arc<dyn BatchWorker>, works: Vec<IndexWork>, slot: usize) {
    debug!(worker = %name, works = works.len(), pool_slot = slot, "Running batch");
    SCHEDULER_METRICS.record_batch_start(name, works.len());
    let started = Instant::now();

    let outcome = AssertUnwindSafe(worker.do_works(works))
        .catch_unwind()
        .await;

    let label = match outcome {
        Ok(Ok(())) => "success",
        Ok(Err(e)) => {
            error!(worker = %name, error = %e, "Batch failed");
            "failure"
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let error = SchedulerError::BatchPanicked(message);
            error!(worker = %name, error = %error, "Batch panicked");
            "panic"
        }
    };
    SCHEDULER_METRICS.record_batch_complete(name, label, started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        name: String,
        batches: Mutex<Vec<Vec<IndexWork>>>,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BatchWorker for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u32 {
            20
        }

        async fn do_works(&self, works: Vec<IndexWork>) -> SchedulerResult<()> {
            self.batches.lock().push(works);
            Ok(())
        }
    }

    struct Panicker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchWorker for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        fn priority(&self) -> u32 {
            1
        }

        async fn do_works(&self, _works: Vec<IndexWork>) -> SchedulerResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_submitted_work_runs() {
        let manager = BatchWorkManager::new(2);
        let recorder = Recorder::new("recorder");
        let worker: Arc<dyn BatchWorker> = recorder.clone();

        manager.submit(&worker, IndexWork::Entity(1)).unwrap();
        manager.wait_until_idle().await;

        let batches = recorder.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![IndexWork::Entity(1)]);
        drop(batches);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_batch_keeps_pool_alive() {
        let manager = BatchWorkManager::new(1);
        let panicker = Arc::new(Panicker {
            calls: AtomicUsize::new(0),
        });
        let worker: Arc<dyn BatchWorker> = panicker.clone();

        manager.submit(&worker, IndexWork::Scan).unwrap();
        manager.wait_until_idle().await;
        manager.submit(&worker, IndexWork::Scan).unwrap();
        manager.wait_until_idle().await;

        assert_eq!(panicker.calls.load(Ordering::SeqCst), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let manager = BatchWorkManager::new(1);
        manager.shutdown().await;

        let worker: Arc<dyn BatchWorker> = Recorder::new("late");
        assert!(matches!(
            manager.submit(&worker, IndexWork::Scan),
            Err(SchedulerError::ShutDown)
        ));
    }
}
