// LogRelay - platform/fs.rs
//
// Ranged file reads.
//
// "Read bytes [a, b) of a file" is exposed as one call returning the
// completed byte sequence. Stat and read happen together on one open handle,
// so both are covered by the same deadline.
//
// `run_with_deadline` runs the blocking call on a helper thread and waits
// with a timeout. On a stalled mounted volume the caller gets
// `ReadError::Timeout` and moves on while the helper is left to finish (or
// hang) on its own. An in-flight flag per file means a second helper is
// never started while the first one is still blocked.

use crate::util::error::ReadError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// File size plus the bytes past a tail offset, taken from one open handle.
#[derive(Debug)]
pub struct TailSnapshot {
    pub size: u64,
    /// `[offset, size)`; empty when the file did not grow past `offset`.
    pub bytes: Vec<u8>,
}

/// The last bytes of a file, for history replay.
#[derive(Debug)]
pub struct TrailingWindow {
    /// Offset where the requested window begins.
    pub start: u64,
    /// The window, preceded by the byte at `start - 1` when `start > 0`.
    pub bytes: Vec<u8>,
}

fn read_from(file: &mut File, start: u64, len: u64) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    file.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Stat `path` and read everything past `offset`.
///
/// A file at or below `offset` yields no bytes; the caller compares `size`
/// with its offset to detect truncation. Fewer bytes than `size - offset`
/// come back if the file shrinks during the read.
pub fn snapshot_from(path: &Path, offset: u64) -> std::io::Result<TailSnapshot> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size <= offset {
        return Ok(TailSnapshot {
            size,
            bytes: Vec::new(),
        });
    }
    let bytes = read_from(&mut file, offset, size - offset)?;
    Ok(TailSnapshot { size, bytes })
}

/// Read the last `window` bytes of `path`, plus one byte before them.
pub fn read_trailing(path: &Path, window: u64) -> std::io::Result<TrailingWindow> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let start = size.saturating_sub(window);
    let read_start = start.saturating_sub(1);
    let bytes = read_from(&mut file, read_start, size - read_start)?;
    Ok(TrailingWindow { start, bytes })
}

/// Run the blocking file operation `op` on a helper thread and wait at most
/// `timeout` for it.
///
/// `in_flight` is held set while the helper runs. If it is already set, the
/// previous helper for this file has not returned yet and `ReadError::Busy`
/// is returned without starting another one.
pub fn run_with_deadline<T, F>(
    path: &Path,
    in_flight: &Arc<AtomicBool>,
    timeout: Duration,
    op: F,
) -> Result<T, ReadError>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    if in_flight.swap(true, Ordering::AcqRel) {
        return Err(ReadError::Busy {
            path: path.to_path_buf(),
        });
    }

    let (tx, rx) = mpsc::channel();
    let flag = Arc::clone(in_flight);
    let spawned = std::thread::Builder::new()
        .name("fs-read".to_string())
        .spawn(move || {
            let result = op();
            flag.store(false, Ordering::Release);
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(result);
        });
    if let Err(source) = spawned {
        in_flight.store(false, Ordering::Release);
        return Err(ReadError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ReadError::Io {
            path: path.to_path_buf(),
            source,
        }),
        Err(_) => Err(ReadError::Timeout {
            path: path.to_path_buf(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
