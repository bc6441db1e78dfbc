//! Classification worker pool.
//!
//! A fixed number of threads compete for tasks on one shared queue. Each
//! task is acknowledged once handled, whether it succeeded or not, so the
//! owner can wait for the queue to drain before shutting the workers down.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::module::error::{Error, Result};

/// Unit of work on the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Image(PathBuf),
    /// Sentinel: the receiving worker exits.
    Shutdown,
}

/// Work done for one queued image.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self) {
        *self.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Cloneable producer side of the pool.
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: Sender<Task>,
    pending: Arc<Pending>,
    seen: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TaskSender {
    /// Queue `path` unless it was queued before.
    ///
    /// Returns whether the path was queued.
    pub fn submit(&self, path: PathBuf) -> Result<bool> {
        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone());
        if !fresh {
            log::debug!("{} already queued, ignored", path.display());
            return Ok(false);
        }
        self.pending.add();
        if let Err(e) = self.tx.send(Task::Image(path)) {
            self.pending.done();
            return Err(Error::Shutdown(format!("queue closed: {:?}", e.into_inner())));
        }
        Ok(true)
    }
}

/// Fixed-size set of classification workers.
pub struct WorkerPool {
    tx: Sender<Task>,
    pending: Arc<Pending>,
    seen: Arc<Mutex<HashSet<PathBuf>>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers sharing `handler`.
    pub fn start(size: usize, handler: Arc<dyn TaskHandler>) -> Result<Self> {
        let (tx, rx) = unbounded::<Task>();
        let pending = Arc::new(Pending::default());
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let handler = Arc::clone(&handler);
            let pending = Arc::clone(&pending);
            let worker = thread::Builder::new()
                .name(format!("classify-{}", i))
                .spawn(move || work(i, rx, handler, pending))?;
            workers.push(worker);
        }
        log::info!("Started {} classification workers", size);
        Ok(Self {
            tx,
            pending,
            seen: Arc::new(Mutex::new(HashSet::new())),
            workers,
        })
    }

    pub fn sender(&self) -> TaskSender {
        TaskSender {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            seen: Arc::clone(&self.seen),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Tasks queued or in flight.
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until every queued task has been acknowledged.
    pub fn wait_idle(&self) {
        self.pending.wait_idle();
    }

    /// Drain the queue, send one sentinel per worker and join them all.
    pub fn shutdown(self) -> Result<()> {
        self.wait_idle();
        for _ in &self.workers {
            self.tx
                .send(Task::Shutdown)
                .map_err(|_| Error::Shutdown("workers already gone".into()))?;
        }
        let mut panicked = 0;
        for worker in self.workers {
            if worker.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(Error::Shutdown(format!("{} workers panicked", panicked)));
        }
        log::info!("Classification workers stopped");
        Ok(())
    }
}

fn work(id: usize, rx: Receiver<Task>, handler: Arc<dyn TaskHandler>, pending: Arc<Pending>) {
    log::debug!("Worker {} started", id);
    loop {
        let path = match rx.recv() {
            Ok(Task::Image(path)) => path,
            Ok(Task::Shutdown) | Err(_) => break,
        };
        // One bad image must not take the worker down.
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&path))) {
            Ok(Ok(())) => (),
            Ok(Err(e)) => log::error!("Worker {}: {} failed: {}", id, path.display(), e),
            Err(_) => log::error!("Worker {}: {} panicked", id, path.display()),
        }
        pending.done();
    }
    log::debug!("Worker {} exit", id);
}
