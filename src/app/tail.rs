// LogRelay - app/tail.rs
//
// Tail reader: turns "this path may have changed" into delivered records.
//
// Architecture:
//   - `TailReader::process` is the single entry point used by both change
//     detection sources (via the dispatcher) and by tests.
//   - The per-path `FileState` mutex is held from the offset read until the
//     batch has been published, so concurrent triggers for one path run one
//     after the other and every byte range is delivered once, in order.
//   - Different paths lock different mutexes and proceed in parallel.
//
// Error policy:
//   - A missing file is `Vanished`, not an error; state is untouched and the
//     next trigger after the file reappears picks up where it left off.
//   - Stat and read run together on a helper thread under `read_timeout`,
//     so a stalled volume cannot pin a worker. Failures and timeouts return
//     `Failed` with the offset unchanged; the next trigger retries. While a
//     timed-out helper is still blocked, retries fail fast as `Busy`.
//   - Truncation/rotation (size < offset) resets the offset to 0 without
//     reading. Content written before the reset was observed is not replayed.
//   - Bad lines never abort a batch; they are counted in `BatchStats`.

use crate::app::fanout::Hub;
use crate::core::model::{BatchStats, TailOutcome};
use crate::core::offsets::{lock_state, OffsetTracker};
use crate::core::parser;
use crate::core::registry::DomainRegistry;
use crate::platform::config::TrailingLinePolicy;
use crate::platform::fs;
use crate::util::constants::MAX_PARTIAL_LINE_BYTES;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Reads the unread range of tracked files and forwards parsed records.
#[derive(Debug)]
pub struct TailReader {
    registry: Arc<DomainRegistry>,
    offsets: Arc<OffsetTracker>,
    hub: Arc<Hub>,
    policy: TrailingLinePolicy,
    read_timeout: Duration,
}

impl TailReader {
    pub fn new(
        registry: Arc<DomainRegistry>,
        offsets: Arc<OffsetTracker>,
        hub: Arc<Hub>,
        policy: TrailingLinePolicy,
        read_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            offsets,
            hub,
            policy,
            read_timeout,
        }
    }

    /// Run one processing cycle for `path`.
    pub fn process(&self, path: &Path) -> TailOutcome {
        let Some(entry) = self.offsets.entry(path) else {
            return TailOutcome::Untracked;
        };
        let mut state = lock_state(&entry);

        if let Some(active) = self.registry.path_for(state.domain()) {
            if active != path {
                return TailOutcome::Superseded { active };
            }
        }

        // --- 1. Current size and unread bytes ---
        let offset = state.offset();
        let owned = path.to_path_buf();
        let snapshot = match fs::run_with_deadline(
            path,
            &state.io_guard(),
            self.read_timeout,
            move || fs::snapshot_from(&owned, offset),
        ) {
            Ok(s) => s,
            Err(e) if e.is_not_found() => return TailOutcome::Vanished,
            Err(e) => return TailOutcome::Failed(e.into()),
        };
        let size = snapshot.size;

        // --- 2. Rotation / truncation ---
        if size < offset {
            state.reset();
            state.observe(size);
            return TailOutcome::Rotated {
                previous_offset: offset,
                size,
            };
        }
        state.observe(size);

        // --- 3. Nothing new ---
        if size == offset {
            return TailOutcome::Unchanged;
        }

        // --- 4. Split the bytes read from [offset, size) ---
        let bytes = snapshot.bytes;
        // A short read means the file shrank between stat and read; the next
        // cycle will notice the truncation.
        let read_end = offset + bytes.len() as u64;

        let consumed = match self.policy {
            TrailingLinePolicy::Consume => bytes.len(),
            TrailingLinePolicy::AwaitTerminator => match parser::complete_prefix_len(&bytes) {
                Some(n) => n,
                None if bytes.len() as u64 > MAX_PARTIAL_LINE_BYTES => {
                    tracing::warn!(
                        file = %path.display(),
                        bytes = bytes.len(),
                        "Abandoning unterminated line that exceeds the partial line limit"
                    );
                    if let Err(e) = state.advance(read_end) {
                        return TailOutcome::Failed(e);
                    }
                    return TailOutcome::Delivered {
                        stats: BatchStats::default(),
                        offset: read_end,
                    };
                }
                None => {
                    return TailOutcome::AwaitingTerminator {
                        pending_bytes: bytes.len() as u64,
                    };
                }
            },
        };
        let new_offset = offset + consumed as u64;

        let text = String::from_utf8_lossy(&bytes[..consumed]);
        let (records, stats) = parser::parse_lines(&text, path);

        if let Err(e) = state.advance(new_offset) {
            return TailOutcome::Failed(e);
        }

        // --- 5. Forward in file order, still under the per-path lock ---
        let domain = state.domain().to_string();
        self.hub
            .publish_batch(&domain, records.into_iter().map(Arc::new).collect());

        TailOutcome::Delivered {
            stats,
            offset: new_offset,
        }
    }
}

/// Log a processing outcome at the level it deserves.
pub fn log_outcome(path: &Path, outcome: &TailOutcome) {
    match outcome {
        TailOutcome::Untracked | TailOutcome::Unchanged => {}
        TailOutcome::Superseded { active } => tracing::trace!(
            file = %path.display(),
            active = %active.display(),
            "Skipping file superseded by a newer file for the same domain"
        ),
        TailOutcome::Vanished => {
            tracing::debug!(file = %path.display(), "Tailed file is missing; will retry")
        }
        TailOutcome::Rotated {
            previous_offset,
            size,
        } => tracing::info!(
            file = %path.display(),
            previous_offset,
            size,
            "File truncated or rotated; offset reset to 0"
        ),
        TailOutcome::AwaitingTerminator { pending_bytes } => tracing::trace!(
            file = %path.display(),
            pending_bytes,
            "Waiting for line terminator"
        ),
        TailOutcome::Delivered { stats, offset } => tracing::debug!(
            file = %path.display(),
            records = stats.records,
            malformed = stats.malformed,
            noise = stats.noise,
            offset,
            "Tail batch delivered"
        ),
        TailOutcome::Failed(e) => {
            tracing::warn!(file = %path.display(), error = %e, "Tail cycle failed; will retry")
        }
    }
}
