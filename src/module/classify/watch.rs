//! Watched image directory.
//!
//! Feeds newly created images of one directory (non-recursive) into the
//! worker pool.

use std::fs;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::pool::TaskSender;
use crate::module::error::Result;
use crate::module::util::path::is_image;

/// Live watch on one directory. Dropping it stops the watch.
pub struct WatchQueue {
    watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl WatchQueue {
    /// Start watching `dir`, submitting every qualifying image to `sender`.
    pub fn start(dir: &Path, sender: TaskSender) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let dir = fs::canonicalize(dir)?;
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::error!("Watch error: {}", e);
                    return;
                }
            };
            for path in qualifying_paths(&event) {
                log::info!("New image detected: {}", path.display());
                if let Err(e) = sender.submit(path) {
                    log::error!("Can't queue image: {}", e);
                }
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        log::info!("Watching {}", dir.display());
        Ok(Self { watcher, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop producing tasks.
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.dir) {
            log::warn!("Unwatch {} failed: {}", self.dir.display(), e);
        }
        log::info!("Stopped watching {}", self.dir.display());
    }
}

/// Queue images already sitting in `dir`, oldest name first.
pub fn scan_backlog(dir: &Path, sender: &TaskSender) -> Result<usize> {
    let dir = fs::canonicalize(dir)?;
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_candidate(p))
        .collect();
    paths.sort();
    let mut queued = 0;
    for path in paths {
        if sender.submit(path)? {
            queued += 1;
        }
    }
    if queued > 0 {
        log::info!("Queued {} images found in {}", queued, dir.display());
    }
    Ok(queued)
}

/// Image paths an event makes available in the directory.
///
/// Files appear either by creation or by being renamed into the directory.
pub fn qualifying_paths(event: &Event) -> Vec<PathBuf> {
    let paths: Vec<&PathBuf> = match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            event.paths.iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).into_iter().collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().filter(|p| p.is_file()).collect()
        }
        _ => vec![],
    };
    paths
        .into_iter()
        .filter(|p| is_candidate(p))
        .cloned()
        .collect()
}

fn is_candidate(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden && is_image(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::classify::pool::{TaskHandler, WorkerPool};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collect {
        paths: Mutex<Vec<PathBuf>>,
    }

    impl TaskHandler for Collect {
        fn handle(&self, path: &Path) -> Result<()> {
            self.paths.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn create_and_rename_events_qualify() {
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/w/vehicle_0.jpg"));
        assert_eq!(qualifying_paths(&created), vec![PathBuf::from("/w/vehicle_0.jpg")]);

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/.vehicle_1.jpg.part"))
            .add_path(PathBuf::from("/w/vehicle_1.jpg"));
        assert_eq!(qualifying_paths(&renamed), vec![PathBuf::from("/w/vehicle_1.jpg")]);

        let renamed_to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/w/vehicle_2.PNG"));
        assert_eq!(qualifying_paths(&renamed_to).len(), 1);
    }

    #[test]
    fn other_events_and_files_are_ignored() {
        let partial = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/w/.vehicle_0.jpg.part"));
        assert!(qualifying_paths(&partial).is_empty());

        let text = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/w/notes.txt"));
        assert!(qualifying_paths(&text).is_empty());

        let folder = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/w/new.jpg"));
        assert!(qualifying_paths(&folder).is_empty());

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/w/vehicle_0.jpg"));
        assert!(qualifying_paths(&removed).is_empty());

        let moved_away = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/w/vehicle_0.jpg"));
        assert!(qualifying_paths(&moved_away).is_empty());
    }

    #[test]
    fn backlog_is_queued_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["vehicle_1.jpg", "vehicle_0.jpg", ".vehicle_2.jpg.part", "x.txt"] {
            fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let handler = Arc::new(Collect::default());
        let pool = WorkerPool::start(1, handler.clone()).unwrap();
        assert_eq!(scan_backlog(tmp.path(), &pool.sender()).unwrap(), 2);
        pool.shutdown().unwrap();

        let root = fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(
            *handler.paths.lock().unwrap(),
            vec![root.join("vehicle_0.jpg"), root.join("vehicle_1.jpg")]
        );
    }

    #[test]
    fn watcher_feeds_new_images() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = Arc::new(Collect::default());
        let pool = WorkerPool::start(2, handler.clone()).unwrap();
        let watch = WatchQueue::start(tmp.path(), pool.sender()).unwrap();

        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        fs::write(tmp.path().join(".vehicle_0.jpg.part"), b"x").unwrap();
        fs::rename(
            tmp.path().join(".vehicle_0.jpg.part"),
            tmp.path().join("vehicle_0.jpg"),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handler.paths.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        watch.stop();
        pool.shutdown().unwrap();

        let paths = handler.paths.lock().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("vehicle_0.jpg"));
    }
}
