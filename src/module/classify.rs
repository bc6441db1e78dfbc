//! Concurrent classification service.
//!
//! A directory watch feeds a fixed pool of workers, each running the
//! classification pipeline on one image at a time.

pub mod pipeline;
pub mod pool;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use self::pool::{TaskHandler, WorkerPool};
use self::watch::WatchQueue;
use crate::module::error::Result;
use crate::module::util::conf::Classify;

/// Running watch plus workers.
pub struct ClassifyService {
    pool: WorkerPool,
    watch: WatchQueue,
}

impl ClassifyService {
    /// Start the workers, then the watch, then queue the backlog.
    ///
    /// The backlog is scanned after the watch is live so no file falls in
    /// between; anything seen by both is queued once.
    pub fn start(watch_dir: &Path, conf: &Classify, handler: Arc<dyn TaskHandler>) -> Result<Self> {
        let pool = WorkerPool::start(conf.workers, handler)?;
        let queue = WatchQueue::start(watch_dir, pool.sender())?;
        if conf.backlog_scan {
            watch::scan_backlog(queue.dir(), &pool.sender())?;
        }
        Ok(Self { pool, watch: queue })
    }

    pub fn pending(&self) -> usize {
        self.pool.pending()
    }

    pub fn wait_idle(&self) {
        self.pool.wait_idle();
    }

    /// Stop watching, finish queued work and join the workers.
    pub fn shutdown(self) -> Result<()> {
        self.watch.stop();
        self.pool.shutdown()
    }
}
