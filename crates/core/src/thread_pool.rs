//! Fixed-size worker pool for blocking file reads.
//!
//! All workers drain one FIFO queue guarded by a single mutex and condition
//! variable. The pool has no notion of recurring work: a [`TaskHandler`]
//! that wants to run again resubmits itself through a [`PoolHandle`].

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::error::{LiveError, Result};

/// Work executed on a pool thread.
pub trait TaskHandler: Send + Sync {
    fn handle_task(self: Arc<Self>);
}

struct FnTask<F>(F);

impl<F: Fn() + Send + Sync> TaskHandler for FnTask<F> {
    fn handle_task(self: Arc<Self>) {
        (self.0)()
    }
}

/// A queued unit of work. Cloning shares the same handler.
#[derive(Clone)]
pub struct Task {
    handler: Arc<dyn TaskHandler>,
}

impl Task {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self { handler }
    }

    pub fn from_fn(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(FnTask(f)),
        }
    }

    fn run(self) {
        self.handler.handle_task();
    }
}

struct PoolState {
    tasks: VecDeque<Task>,
    quit: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    cond: Condvar,
}

impl Shared {
    fn add_task(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        if state.quit {
            return Err(LiveError::PoolShutdown);
        }
        state.tasks.push_back(task);
        self.cond.notify_one();
        Ok(())
    }
}

/// Cloneable, thread-safe submitter for a [`ThreadPool`].
///
/// Tasks use this to resubmit themselves; it does not keep workers alive.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    pub fn add_task(&self, task: Task) -> Result<()> {
        self.shared.add_task(task)
    }
}

/// Fixed set of worker threads sharing one task queue.
///
/// Dropping the pool shuts it down.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start `worker_count` workers (at least one).
    pub fn new(worker_count: usize) -> Result<Self> {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                quit: false,
            }),
            cond: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(worker_count),
        };

        for index in 0..worker_count {
            let shared = pool.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("live-worker-{index}"))
                .spawn(move || worker_loop(index, &shared));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(source) => {
                    tracing::error!(index, error = %source, "failed to spawn worker");
                    // dropping `pool` joins the workers already running
                    return Err(LiveError::WorkerSpawn { index, source });
                }
            }
        }

        tracing::info!(workers = worker_count, "thread pool started");
        Ok(pool)
    }

    pub fn add_task(&self, task: Task) -> Result<()> {
        self.shared.add_task(task)
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting tasks, wake every worker and join them.
    ///
    /// Tasks still queued are dropped. Tasks already running finish first.
    /// Calling this twice is harmless.
    pub fn shutdown(&mut self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            if state.quit && self.workers.is_empty() {
                return;
            }
            state.quit = true;
            let dropped = state.tasks.len();
            state.tasks.clear();
            dropped
        };
        // every parked worker has to see the flag, not just one
        self.shared.cond.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a task");
            }
        }

        tracing::info!(dropped_tasks = dropped, "thread pool shut down");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, shared: &Shared) {
    tracing::debug!(worker = index, "worker started");
    loop {
        let task = {
            let mut state = shared.state.lock();
            while state.tasks.is_empty() && !state.quit {
                shared.cond.wait(&mut state);
            }
            if state.quit {
                break;
            }
            state.tasks.pop_front()
        };

        if let Some(task) = task {
            if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                tracing::error!(worker = index, "task panicked");
            }
        }
    }
    tracing::debug!(worker = index, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn runs_submitted_tasks() {
        let pool = ThreadPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = parking_lot::Mutex::new(tx.clone());
            pool.add_task(Task::from_fn(move || {
                let _ = tx.lock().send(i);
            }))
            .unwrap();
        }

        let mut seen: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn idle_shutdown_returns_promptly() {
        for workers in [1, 4, 16] {
            let mut pool = ThreadPool::new(workers).unwrap();
            assert_eq!(pool.worker_count(), workers);
            let start = Instant::now();
            pool.shutdown();
            assert!(start.elapsed() < Duration::from_secs(2));
            assert_eq!(pool.worker_count(), 0);
        }
    }

    #[test]
    fn zero_workers_means_one() {
        let pool = ThreadPool::new(0).unwrap();
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn add_after_shutdown_fails() {
        let mut pool = ThreadPool::new(1).unwrap();
        let handle = pool.handle();
        pool.shutdown();
        assert!(matches!(
            handle.add_task(Task::from_fn(|| {})),
            Err(LiveError::PoolShutdown)
        ));
        pool.shutdown();
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = ThreadPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.add_task(Task::from_fn(|| panic!("boom"))).unwrap();
        let c = counter.clone();
        pool.add_task(Task::from_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        let start = Instant::now();
        while counter.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn task_can_resubmit_itself() {
        struct Countdown {
            left: AtomicUsize,
            pool: PoolHandle,
            done: parking_lot::Mutex<Option<mpsc::Sender<()>>>,
        }

        impl TaskHandler for Countdown {
            fn handle_task(self: Arc<Self>) {
                if self.left.fetch_sub(1, Ordering::SeqCst) > 1 {
                    let pool = self.pool.clone();
                    let _ = pool.add_task(Task::new(self));
                } else if let Some(tx) = self.done.lock().take() {
                    let _ = tx.send(());
                }
            }
        }

        let pool = ThreadPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        let countdown = Arc::new(Countdown {
            left: AtomicUsize::new(5),
            pool: pool.handle(),
            done: parking_lot::Mutex::new(Some(tx)),
        });
        pool.add_task(Task::new(countdown.clone())).unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(countdown.left.load(Ordering::SeqCst), 0);
    }
}
