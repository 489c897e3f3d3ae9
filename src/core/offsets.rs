// LogRelay - core/offsets.rs
//
// Offset tracker: per-file read progress.
//
// Each tracked path owns an `Arc<Mutex<FileState>>`. Holding that mutex is
// the per-path critical section: the tail reader keeps it locked from the
// moment it reads the offset until it has advanced it, so two triggers for
// the same path can never both read from the same starting offset. Different
// paths have independent mutexes and proceed in parallel. The outer map lock
// is only held long enough to clone the Arc.
//
// Offsets move forward only; the single exception is `reset` to 0 when the
// file is observed shorter than the offset (rotation or truncation).

use crate::util::error::TailError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Read progress for one file. Created on first discovery and kept for the
/// lifetime of the process.
#[derive(Debug)]
pub struct FileState {
    path: PathBuf,
    domain: String,
    /// Byte position up to which the file has been consumed.
    offset: u64,
    /// File size seen by the most recent processing cycle.
    observed_size: u64,
    /// Set while a timed read helper for this file is still running.
    io_busy: Arc<AtomicBool>,
}

impl FileState {
    fn new(path: PathBuf, domain: String, offset: u64) -> Self {
        Self {
            path,
            domain,
            offset,
            observed_size: offset,
            io_busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn observed_size(&self) -> u64 {
        self.observed_size
    }

    /// In-flight flag shared with this file's timed read helper.
    pub fn io_guard(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.io_busy)
    }

    /// Remember the size seen by the current cycle.
    pub fn observe(&mut self, size: u64) {
        self.observed_size = size;
    }

    /// Move the offset forward to `new_offset`.
    ///
    /// Moving backwards is refused; use `reset` for rotation.
    pub fn advance(&mut self, new_offset: u64) -> Result<(), TailError> {
        if new_offset < self.offset {
            return Err(TailError::OffsetRegression {
                path: self.path.clone(),
                current: self.offset,
                requested: new_offset,
            });
        }
        self.offset = new_offset;
        Ok(())
    }

    /// Rewind to the start of the file after rotation/truncation.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

/// Lock a file state, recovering from poisoning (every writer leaves the
/// state consistent between statements).
pub fn lock_state(state: &Mutex<FileState>) -> MutexGuard<'_, FileState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe path -> `FileState` map.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    files: RwLock<HashMap<PathBuf, Arc<Mutex<FileState>>>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `path` at its current end of file, so content written
    /// before discovery is not replayed as live. A path that cannot be
    /// stat'ed starts at 0.
    ///
    /// Returns the initial offset when this call started tracking the path,
    /// or `None` when it was already tracked (its offset is left alone).
    /// Exactly one of several racing callers gets `Some`.
    pub fn init_at_end(&self, path: &Path, domain: &str) -> Option<u64> {
        if self.entry(path).is_some() {
            return None;
        }

        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the write lock: a racing discovery may have won.
        if files.contains_key(path) {
            return None;
        }
        files.insert(
            path.to_path_buf(),
            Arc::new(Mutex::new(FileState::new(
                path.to_path_buf(),
                domain.to_string(),
                size,
            ))),
        );
        tracing::debug!(
            file = %path.display(),
            offset = size,
            "Seeding initial offset at end of file"
        );
        Some(size)
    }

    /// The shared state for `path`, if tracked.
    pub fn entry(&self, path: &Path) -> Option<Arc<Mutex<FileState>>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// The current offset for `path`, if tracked.
    pub fn get_offset(&self, path: &Path) -> Option<u64> {
        self.entry(path).map(|s| lock_state(&s).offset())
    }

    /// Set the offset for `path`, forward only.
    pub fn advance(&self, path: &Path, new_offset: u64) -> Result<(), TailError> {
        let state = self.entry(path).ok_or_else(|| TailError::Untracked {
            path: path.to_path_buf(),
        })?;
        let mut guard = lock_state(&state);
        guard.advance(new_offset)
    }

    /// Rewind `path` to offset 0. No-op for untracked paths.
    pub fn reset(&self, path: &Path) {
        if let Some(state) = self.entry(path) {
            lock_state(&state).reset();
        }
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_init_at_end_uses_current_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.log");
        fs::write(&path, b"0123456789\n").unwrap();

        let tracker = OffsetTracker::new();
        assert_eq!(tracker.init_at_end(&path, "a.com"), Some(11));
        assert_eq!(tracker.get_offset(&path), Some(11));
    }

    #[test]
    fn test_init_at_end_keeps_existing_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.log");
        fs::write(&path, b"abc\n").unwrap();

        let tracker = OffsetTracker::new();
        tracker.init_at_end(&path, "a.com");
        fs::write(&path, b"abc\ndef\n").unwrap();
        // Rediscovery must not jump the offset over unread content.
        assert_eq!(tracker.init_at_end(&path, "a.com"), None);
        assert_eq!(tracker.get_offset(&path), Some(4));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_racing_init_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.log");
        fs::write(&path, b"abc\n").unwrap();

        let tracker = Arc::new(OffsetTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let path = path.clone();
                std::thread::spawn(move || tracker.init_at_end(&path, "a.com"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(winners, 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_missing_file_starts_at_zero() {
        let tracker = OffsetTracker::new();
        let path = Path::new("/nonexistent/logrelay/x.log");
        assert_eq!(tracker.init_at_end(path, "x"), Some(0));
    }

    #[test]
    fn test_advance_forward_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, b"").unwrap();

        let tracker = OffsetTracker::new();
        tracker.init_at_end(&path, "a");
        tracker.advance(&path, 10).unwrap();
        let err = tracker.advance(&path, 5).unwrap_err();
        assert!(matches!(
            err,
            TailError::OffsetRegression {
                current: 10,
                requested: 5,
                ..
            }
        ));
        assert_eq!(tracker.get_offset(&path), Some(10));

        tracker.reset(&path);
        assert_eq!(tracker.get_offset(&path), Some(0));
    }

    #[test]
    fn test_advance_untracked_path_errors() {
        let tracker = OffsetTracker::new();
        assert!(matches!(
            tracker.advance(Path::new("nope.log"), 1),
            Err(TailError::Untracked { .. })
        ));
    }
}
