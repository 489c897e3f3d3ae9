// LogRelay - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Configuration validation clamps user values against the MIN_/MAX_ bounds here.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogRelay";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogRelay";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Log directory
// =============================================================================

/// Directory watched for per-domain log files when nothing else is configured.
pub const DEFAULT_LOG_DIR: &str = "/opt/caddy/logs";

/// Filename glob a file must match to be treated as a domain log.
pub const DEFAULT_LOG_PATTERN: &str = "*.log";

// =============================================================================
// Change detection
// =============================================================================

/// How often the poll source sweeps every known file (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Minimum user-configurable poll interval (ms).
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Maximum user-configurable poll interval (ms).
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// How often the poll source re-lists the log directory for files the event
/// source did not report (ms).
pub const DEFAULT_RESCAN_INTERVAL_MS: u64 = 5_000;

/// Minimum user-configurable directory rescan interval (ms).
pub const MIN_RESCAN_INTERVAL_MS: u64 = 1_000;

/// Maximum user-configurable directory rescan interval (ms).
pub const MAX_RESCAN_INTERVAL_MS: u64 = 600_000;

/// How often background loops wake to check their cancel flag (ms).
pub const CANCEL_CHECK_INTERVAL_MS: u64 = 100;

/// Debounce interval handed to the native watcher backend (ms).
pub const WATCH_DEBOUNCE_MS: u64 = 100;

// =============================================================================
// Tail reader
// =============================================================================

/// Default number of dispatcher worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Hard upper bound on dispatcher worker threads.
pub const MAX_WORKER_THREADS: usize = 64;

/// Deadline for a single ranged read before the attempt is abandoned (ms).
/// Generous on purpose: mounted volumes can stall for tens of seconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Minimum user-configurable read timeout (ms).
pub const MIN_READ_TIMEOUT_MS: u64 = 100;

/// Maximum user-configurable read timeout (ms).
pub const MAX_READ_TIMEOUT_MS: u64 = 600_000;

/// A line that fails to parse and is no longer than this (after trimming) is
/// treated as partial-write noise and dropped without a warning.
pub const NOISE_LINE_MAX_LEN: usize = 10;

/// Largest unterminated trailing fragment that `await_terminator` will keep
/// re-reading. Beyond this the fragment is abandoned so a file with no
/// newlines cannot force unbounded re-reads.
pub const MAX_PARTIAL_LINE_BYTES: u64 = 2 * 1_024 * 1_024; // 2 MiB

/// Maximum length of a log line included in a malformed-line warning.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// History
// =============================================================================

/// Trailing byte window read for a history request. Sized to comfortably
/// hold the ~1000 most recent access-log records a viewer displays.
pub const DEFAULT_HISTORY_WINDOW_BYTES: u64 = 500 * 1_024; // 500 KiB

/// Minimum user-configurable history window (bytes).
pub const MIN_HISTORY_WINDOW_BYTES: u64 = 1_024;

/// Maximum user-configurable history window (bytes).
pub const MAX_HISTORY_WINDOW_BYTES: u64 = 64 * 1_024 * 1_024; // 64 MiB

// =============================================================================
// Subscription transport
// =============================================================================

/// Default bind address for the line-delimited JSON subscription listener.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7070";

/// Longest accepted client command line in bytes; longer lines close the
/// connection.
pub const MAX_COMMAND_LINE_BYTES: usize = 4 * 1_024;

/// Events a subscriber's queue holds before the hub evicts it as stalled.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 16_384;

/// How long a history reply waits for room in a full subscriber queue.
pub const DIRECT_DELIVERY_TIMEOUT_MS: u64 = 30_000;

/// Pause between attempts while a history reply waits for queue room.
pub const DIRECT_DELIVERY_RETRY_MS: u64 = 10;

/// A socket write blocked this long ends the connection.
pub const SOCKET_WRITE_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";
