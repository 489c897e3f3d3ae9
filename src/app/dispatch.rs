// LogRelay - app/dispatch.rs
//
// Dispatcher: a fixed pool of worker threads processing "check this path"
// work items submitted by the event source and the poll source.
//
// Guarantees:
//   - At most one worker processes a given path at a time.
//   - A path already waiting in the queue is not queued twice.
//   - A path submitted while it is being processed is re-run exactly once
//     after the current run completes, so a change that lands mid-run is
//     never missed.
//   - Different paths are processed in parallel.
//
// The processor itself also serializes per path (see app/tail.rs); the
// dispatcher's coalescing keeps the pool from filling up with duplicate work
// when both sources fire for the same append.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Processor = dyn Fn(&Path) + Send + Sync;

#[derive(Debug, Default)]
struct Queue {
    pending: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
    running: HashSet<PathBuf>,
    rerun: HashSet<PathBuf>,
    shutdown: bool,
}

impl Queue {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when work is queued or shutdown starts.
    work: Condvar,
    /// Signalled when the queue drains and no worker is busy.
    idle: Condvar,
    processor: Box<Processor>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-path serialized work queue backed by a worker pool.
pub struct Dispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `threads` workers that call `processor` for each submitted path.
    pub fn start<F>(threads: usize, processor: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
            processor: Box::new(processor),
        });

        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("tail-worker-{i}"))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!(worker = i, error = %e, "Failed to spawn tail worker"),
            }
        }

        tracing::debug!(workers = workers.len(), "Dispatcher started");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queue `path` for processing. Returns false after shutdown.
    pub fn submit(&self, path: &Path) -> bool {
        let mut queue = self.shared.lock();
        if queue.shutdown {
            return false;
        }

        if queue.running.contains(path) {
            queue.rerun.insert(path.to_path_buf());
        } else if queue.queued.insert(path.to_path_buf()) {
            queue.pending.push_back(path.to_path_buf());
            self.shared.work.notify_one();
        }
        true
    }

    /// Number of paths waiting (not counting those being processed).
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Block until no work is queued or running, or `timeout` elapses.
    /// Returns true if the dispatcher went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.lock();
        while !queue.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            queue = self
                .shared
                .idle
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stop accepting work and join the workers. Each worker finishes the
    /// item it is processing; queued items are dropped.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
            let dropped = queue.pending.len();
            queue.pending.clear();
            queue.queued.clear();
            queue.rerun.clear();
            if dropped > 0 {
                tracing::debug!(dropped, "Dropping queued work at shutdown");
            }
        }
        self.shared.work.notify_all();
        self.shared.idle.notify_all();

        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Tail worker panicked");
            }
        }
        tracing::debug!("Dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let path = {
            let mut queue = shared.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(path) = queue.pending.pop_front() {
                    queue.queued.remove(&path);
                    queue.running.insert(path.clone());
                    break path;
                }
                queue = shared
                    .work
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        (shared.processor)(&path);

        let mut queue = shared.lock();
        queue.running.remove(&path);
        if !queue.shutdown && queue.rerun.remove(&path) {
            queue.queued.insert(path.clone());
            queue.pending.push_back(path);
            shared.work.notify_one();
        }
        if queue.is_idle() {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_each_submitted_path_is_processed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatcher = Dispatcher::start(2, move |p: &Path| {
            sink.lock().unwrap().push(p.to_path_buf());
        });

        dispatcher.submit(Path::new("a.log"));
        dispatcher.submit(Path::new("b.log"));
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![PathBuf::from("a.log"), PathBuf::from("b.log")]);
    }

    #[test]
    fn test_same_path_never_runs_concurrently() {
        let active: Arc<Mutex<HashMap<PathBuf, usize>>> = Arc::default();
        let overlap = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let (a, o, r) = (Arc::clone(&active), Arc::clone(&overlap), Arc::clone(&runs));
        let dispatcher = Dispatcher::start(4, move |p: &Path| {
            {
                let mut map = a.lock().unwrap();
                let n = map.entry(p.to_path_buf()).or_insert(0);
                *n += 1;
                if *n > 1 {
                    o.fetch_add(1, Ordering::SeqCst);
                }
            }
            std::thread::sleep(Duration::from_millis(5));
            *a.lock().unwrap().get_mut(p).unwrap() -= 1;
            r.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..50 {
            dispatcher.submit(Path::new("same.log"));
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(dispatcher.wait_idle(Duration::from_secs(10)));
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        let runs = runs.load(Ordering::SeqCst);
        assert!(runs >= 1 && runs <= 50, "runs = {runs}");
    }

    #[test]
    fn test_submit_during_run_triggers_one_rerun() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let gate = Arc::new(Mutex::new(()));
        let hold = gate.lock().unwrap();

        let (r, g) = (Arc::clone(&runs), Arc::clone(&gate));
        let dispatcher = Dispatcher::start(1, move |_: &Path| {
            let first = r.fetch_add(1, Ordering::SeqCst) == 0;
            if first {
                started_tx.send(()).unwrap();
                let _wait = g.lock().unwrap();
            }
        });

        dispatcher.submit(Path::new("x.log"));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Three submits while running coalesce into a single re-run.
        dispatcher.submit(Path::new("x.log"));
        dispatcher.submit(Path::new("x.log"));
        dispatcher.submit(Path::new("x.log"));
        drop(hold);

        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let dispatcher = Dispatcher::start(1, |_: &Path| {});
        dispatcher.shutdown();
        assert!(!dispatcher.submit(Path::new("a.log")));
        assert_eq!(dispatcher.pending(), 0);
    }
}
