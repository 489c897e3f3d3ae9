// LogRelay - app/watcher.rs
//
// Event source: native filesystem notifications for the log directory.
//
// Architecture:
//   - A `notify::RecommendedWatcher` (inotify / FSEvents / ReadDirectoryChangesW)
//     watches the log directory non-recursively and pushes raw events into an
//     mpsc channel from its own backend thread.
//   - A dedicated thread drains that channel, filters paths through the
//     filename pattern, and turns each event into an `FsChange` handed to the
//     caller's callback.
//   - An `Arc<AtomicBool>` cancel flag stops the thread; it polls the channel
//     with a short timeout so cancellation is noticed promptly.
//
// Remove events are ignored: a vanished file is reported by the next tail
// cycle and self-heals when the producer recreates it.

use crate::core::discovery::is_log_file;
use crate::util::constants::{CANCEL_CHECK_INTERVAL_MS, WATCH_DEBOUNCE_MS};
use crate::util::error::WatchError;
use glob::Pattern;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// A relevant change to a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    /// A matching file appeared (created or renamed into the directory).
    Added(PathBuf),
    /// A matching file's content or metadata changed.
    Modified(PathBuf),
}

/// Running native watcher. Dropping it stops the event thread.
pub struct EventSource {
    // Kept alive for as long as events are wanted; dropping it closes the
    // backend and disconnects the channel.
    watcher: Option<RecommendedWatcher>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventSource {
    /// Start watching `dir`, calling `on_change` for every relevant change.
    pub fn start<F>(dir: &Path, pattern: Pattern, on_change: F) -> Result<Self, WatchError>
    where
        F: Fn(FsChange) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let config =
            Config::default().with_poll_interval(Duration::from_millis(WATCH_DEBOUNCE_MS));
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            config,
        )
        .map_err(|source| WatchError::Init { source })?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let dir = dir.to_path_buf();
        let handle = std::thread::Builder::new()
            .name("fs-events".to_string())
            .spawn(move || run_event_loop(&dir, &pattern, &rx, &thread_cancel, &on_change))
            .ok();

        tracing::info!("Native file watcher started");
        Ok(Self {
            watcher: Some(watcher),
            cancel,
            handle,
        })
    }

    /// Stop the event thread and release the watcher.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.watcher = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("File event thread panicked");
            }
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_event_loop(
    dir: &Path,
    pattern: &Pattern,
    rx: &mpsc::Receiver<notify::Result<Event>>,
    cancel: &AtomicBool,
    on_change: &dyn Fn(FsChange),
) {
    let tick = Duration::from_millis(CANCEL_CHECK_INTERVAL_MS);
    while !cancel.load(Ordering::SeqCst) {
        match rx.recv_timeout(tick) {
            Ok(Ok(event)) => {
                for change in classify(&event, dir, pattern) {
                    tracing::trace!(change = ?change, "File event");
                    on_change(change);
                }
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "File watcher error"),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::debug!("File watcher channel closed");
                break;
            }
        }
    }
    tracing::debug!("File event thread exiting");
}

/// Map one raw notification onto the changes the engine cares about.
pub fn classify(event: &Event, dir: &Path, pattern: &Pattern) -> Vec<FsChange> {
    let relevant = event
        .paths
        .iter()
        .filter(|p| is_log_file(p, dir, pattern));

    match event.kind {
        EventKind::Create(_) => relevant.map(|p| FsChange::Added(p.clone())).collect(),
        // A rename reports both ends; only the end that now exists is new.
        EventKind::Modify(ModifyKind::Name(_)) => relevant
            .filter(|p| p.exists())
            .map(|p| FsChange::Added(p.clone()))
            .collect(),
        EventKind::Modify(_) => relevant.map(|p| FsChange::Modified(p.clone())).collect(),
        EventKind::Remove(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};

    fn pattern() -> Pattern {
        Pattern::new("*.log").unwrap()
    }

    #[test]
    fn test_classify_create_and_modify() {
        let dir = Path::new("/logs");
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/logs/a.com.log"));
        assert_eq!(
            classify(&create, dir, &pattern()),
            vec![FsChange::Added(PathBuf::from("/logs/a.com.log"))]
        );

        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/logs/a.com.log"));
        assert_eq!(
            classify(&modify, dir, &pattern()),
            vec![FsChange::Modified(PathBuf::from("/logs/a.com.log"))]
        );
    }

    #[test]
    fn test_classify_filters_non_matching_and_removes() {
        let dir = Path::new("/logs");
        let swap = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/logs/.a.com.log.swp"));
        assert!(classify(&swap, dir, &pattern()).is_empty());

        let remove = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/logs/a.com.log"));
        assert!(classify(&remove, dir, &pattern()).is_empty());
    }

    #[test]
    fn test_classify_rename_reports_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("b.com.log");
        std::fs::write(&target, "").unwrap();

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(dir.path().join("b.com.log.tmp"))
            .add_path(target.clone());
        let changes = classify(&rename, dir.path(), &pattern());
        assert_eq!(changes, vec![FsChange::Added(target)]);
    }

    #[test]
    fn test_watcher_reports_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, rx) = mpsc::channel();
        let source = EventSource::start(&root, pattern(), move |change| {
            let _ = tx.send(change);
        });
        let Ok(mut source) = source else {
            // No native backend on this host.
            return;
        };

        let path = root.join("c.com.log");
        std::fs::write(&path, "x\n").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut seen = false;
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(FsChange::Added(p)) | Ok(FsChange::Modified(p)) if p == path => {
                    seen = true;
                    break;
                }
                _ => {}
            }
        }
        source.stop();
        assert!(seen, "expected an event for {}", path.display());
    }
}
