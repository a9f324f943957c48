//! `FixedPool`: fixed-size `Executor` implementation.
//!
//! Spawns N OS threads at creation. Workers dequeue tasks from a lock-free
//! bounded MPMC queue. Idle workers advertise themselves on a second queue
//! and park; `submit()` unparks one of them.
//!
//! No dynamic scaling. Simple, predictable, safe.

use portico_core::error::SubmitError;
use portico_core::executor::{Executor, Task};

use crossbeam_queue::ArrayQueue;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;
use tracing::{debug, error};

/// Upper bound on a parked worker's sleep; covers a missed unpark.
const IDLE_PARK: Duration = Duration::from_millis(10);

/// Shared state between submitters and workers.
struct PoolInner {
    /// Work queue: submitters → workers.
    work_queue: ArrayQueue<Task>,
    /// Workers about to park.
    idle: ArrayQueue<Thread>,
    /// Number of workers currently running a task.
    active: AtomicUsize,
    shutdown: AtomicBool,
    total: usize,
}

pub struct FixedPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FixedPool {
    /// Create a pool with `n` workers (clamped to 1..=256).
    ///
    /// `queue_depth`: max pending tasks before `submit()` fails with
    /// `QueueFull`.
    pub fn new(n: usize, queue_depth: usize) -> io::Result<Self> {
        let n = n.clamp(1, 256);
        let inner = Arc::new(PoolInner {
            work_queue: ArrayQueue::new(queue_depth.max(1)),
            idle: ArrayQueue::new(n * 4),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            total: n,
        });

        let pool = FixedPool {
            inner: Arc::clone(&inner),
            handles: Mutex::new(Vec::with_capacity(n)),
        };

        for worker_id in 0..n {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("portico-worker-{}", worker_id))
                .spawn(move || worker_loop(inner, worker_id))?;
            pool.lock_handles().push(handle);
        }

        debug!(workers = n, queue_depth, "[pool] started");
        Ok(pool)
    }

    /// Default pool sizing: nproc * 2, between 4 and 64.
    pub fn auto_sized(queue_depth: usize) -> io::Result<Self> {
        let cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new((cpus * 2).clamp(4, 64), queue_depth)
    }

    /// Workers currently running a task.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.work_queue.len()
    }

    /// Stop accepting tasks, let workers drain the queue, and join them.
    ///
    /// Idempotent. Called from a worker thread it skips joining itself.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let handles = std::mem::take(&mut *self.lock_handles());
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.thread().unpark();
        }
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                error!("[pool] worker exited by panic");
            }
        }
        debug!("[pool] shut down");
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Executor for FixedPool {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown);
        }
        self.inner
            .work_queue
            .push(task)
            .map_err(|_| SubmitError::QueueFull)?;
        if let Some(worker) = self.inner.idle.pop() {
            worker.unpark();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fixed-pool"
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop.
///
/// Exits once shutdown is flagged and the queue is empty, so tasks already
/// accepted by `submit()` always run.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    loop {
        match inner.work_queue.pop() {
            Some(task) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(worker_id, "[pool] task panicked");
                }
                inner.active.fetch_sub(1, Ordering::Relaxed);
            }
            None => {
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                let _ = inner.idle.push(thread::current());
                // Re-check after advertising; a submit racing with us has
                // either pushed already or will unpark us.
                if inner.work_queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
                    thread::park_timeout(IDLE_PARK);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_runs_submitted_tasks() {
        let pool = FixedPool::new(2, 64).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let mut got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = FixedPool::new(1, 64).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = Arc::clone(&done);
            pool.submit(Box::new(move || {
                thread::sleep(Duration::from_millis(1));
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(SubmitError::ShutDown)
        ));
        // second shutdown is a no-op
        pool.shutdown();
    }

    #[test]
    fn test_queue_full_drops_task() {
        let pool = FixedPool::new(1, 1).unwrap();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Worker is busy: one task fits, the next is rejected and dropped.
        pool.submit(Box::new(|| {})).unwrap();
        let captured = Arc::new(());
        let held = Arc::clone(&captured);
        let err = pool.submit(Box::new(move || drop(held))).unwrap_err();
        assert!(matches!(err, SubmitError::QueueFull));
        assert_eq!(Arc::strong_count(&captured), 1);

        gate_tx.send(()).unwrap();
    }

    #[test]
    fn test_panicking_task_keeps_worker() {
        let pool = FixedPool::new(1, 8).unwrap();
        pool.submit(Box::new(|| panic!("handler bug"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send(()).unwrap())).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(pool.total(), 1);
    }
}
