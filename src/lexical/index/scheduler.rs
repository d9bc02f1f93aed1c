//! Background merge scheduling.
//!
//! A fixed set of worker threads consumes merge tasks from a bounded queue. Every
//! task carries its own cancellation flag, which [`MergeScheduler::close`] raises for
//! queued and running tasks alike before joining the workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use ahash::AHashMap;
use crossbeam_channel::{Sender, TrySendError, bounded};
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::error::{Result, XiphosError};
use crate::lexical::index::config::MergeSchedulerConfig;

/// Work of one merge; receives the task's cancellation flag.
pub type MergeJob = Box<dyn FnOnce(&AtomicBool) -> Result<()> + Send + 'static>;

struct MergeTask {
    id: u64,
    description: String,
    cancel: Arc<AtomicBool>,
    job: MergeJob,
}

/// Counters of a scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Bounded worker pool running merges.
pub struct MergeScheduler {
    sender: Mutex<Option<Sender<MergeTask>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Cancellation flags of queued and running tasks.
    active: Arc<Mutex<AHashMap<u64, Arc<AtomicBool>>>>,
    counters: Arc<Counters>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for MergeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeScheduler")
            .field("workers", &self.workers.lock().len())
            .field("active", &self.active.lock().len())
            .finish()
    }
}

impl MergeScheduler {
    pub fn new(config: &MergeSchedulerConfig) -> Result<Self> {
        let (sender, receiver) = bounded::<MergeTask>(config.queue_capacity.max(1));
        let active: Arc<Mutex<AHashMap<u64, Arc<AtomicBool>>>> = Arc::default();
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::new();
        for worker_id in 0..config.max_threads.max(1) {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("xiphos-merge-{worker_id}"))
                .spawn(move || {
                    // ends once the sender is dropped and the queue is drained
                    for task in receiver.iter() {
                        run_task(task, &counters);
                    }
                    debug!("merge worker {worker_id} stopped");
                })?;
            workers.push(handle);
        }
        let scheduler = MergeScheduler {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            active,
            counters,
            next_id: AtomicU64::new(0),
        };
        Ok(scheduler)
    }

    /// Queues a merge. Fails with `ResourceExhausted` when the queue is full and with
    /// `InvalidOperation` after [`close`](Self::close).
    pub fn submit(&self, description: impl Into<String>, job: MergeJob) -> Result<Arc<AtomicBool>> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| XiphosError::invalid_operation("merge scheduler is closed"))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        let active = Arc::clone(&self.active);
        active.lock().insert(id, Arc::clone(&cancel));

        let description = description.into();
        let task = MergeTask {
            id,
            description: description.clone(),
            cancel: Arc::clone(&cancel),
            job: Box::new(move |flag: &AtomicBool| {
                let result = job(flag);
                active.lock().remove(&id);
                result
            }),
        };
        match sender.try_send(task) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!("queued merge #{id}: {description}");
                Ok(cancel)
            }
            Err(TrySendError::Full(_)) => {
                self.active.lock().remove(&id);
                Err(XiphosError::resource_exhausted(format!(
                    "merge queue is full, dropping {description}"
                )))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.active.lock().remove(&id);
                Err(XiphosError::invalid_operation("merge workers have stopped"))
            }
        }
    }

    /// Queued plus running merges.
    pub fn pending(&self) -> usize {
        self.active.lock().len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Cancels every queued and running merge and waits for the workers to exit.
    pub fn close(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        for cancel in self.active.lock().values() {
            cancel.store(true, Ordering::Relaxed);
        }
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("a merge worker panicked");
            }
        }
        info!("merge scheduler closed");
    }
}

impl Drop for MergeScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_task(task: MergeTask, counters: &Counters) {
    let MergeTask {
        id,
        description,
        cancel,
        job,
    } = task;
    match job(&cancel) {
        Ok(()) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) if e.is_cancelled() => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            info!("merge #{id} cancelled: {description}");
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!("merge #{id} failed ({description}): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(max_threads: usize, queue_capacity: usize) -> MergeSchedulerConfig {
        MergeSchedulerConfig {
            max_threads,
            queue_capacity,
        }
    }

    #[test]
    fn test_runs_submitted_jobs() {
        let scheduler = MergeScheduler::new(&config(2, 8)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..4 {
            let tx = tx.clone();
            scheduler
                .submit(
                    format!("job {i}"),
                    Box::new(move |_| {
                        tx.send(i).unwrap();
                        Ok(())
                    }),
                )
                .unwrap();
        }
        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);

        scheduler.close();
        let stats = scheduler.stats();
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.completed, 4);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_full_queue_is_reported() {
        let scheduler = MergeScheduler::new(&config(1, 1)).unwrap();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        scheduler
            .submit(
                "blocker",
                Box::new(move |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        scheduler.submit("queued", Box::new(|_| Ok(()))).unwrap();
        let err = scheduler.submit("rejected", Box::new(|_| Ok(()))).unwrap_err();
        assert!(matches!(err, XiphosError::ResourceExhausted(_)));

        release_tx.send(()).unwrap();
        scheduler.close();
        assert!(scheduler.submit("late", Box::new(|_| Ok(()))).is_err());
    }

    #[test]
    fn test_close_cancels_running_job() {
        let scheduler = MergeScheduler::new(&config(1, 2)).unwrap();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        scheduler
            .submit(
                "long merge",
                Box::new(move |cancel| {
                    started_tx.send(()).unwrap();
                    while !cancel.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Err(XiphosError::cancelled("merge"))
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        scheduler.close();
        assert_eq!(scheduler.stats().cancelled, 1);
    }
}
