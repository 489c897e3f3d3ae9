// LogRelay - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Every subsystem owns one enum; `LogRelayError` wraps them for callers that
// only need to report. All errors preserve the causal chain for diagnostic
// logging.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LogRelay operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogRelayError {
    /// Startup directory scan failed.
    Discovery(DiscoveryError),

    /// The filesystem event source could not be set up.
    Watch(WatchError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// The subscription listener failed.
    Server(ServerError),
}

impl fmt::Display for LogRelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(e) => write!(f, "Discovery error: {e}"),
            Self::Watch(e) => write!(f, "Watch error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Server(e) => write!(f, "Server error: {e}"),
        }
    }
}

impl std::error::Error for LogRelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Discovery(e) => Some(e),
            Self::Watch(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Server(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors related to scanning the log directory.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The log directory does not exist or is not accessible.
    RootNotFound { path: PathBuf },

    /// The log directory path is not a directory.
    NotADirectory { path: PathBuf },

    /// Permission denied accessing the log directory.
    PermissionDenied { path: PathBuf, source: io::Error },

    /// Walkdir traversal error on the directory itself.
    Traversal {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// The configured filename pattern is not a valid glob.
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootNotFound { path } => {
                write!(f, "Log directory '{}' does not exist", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "Log directory '{}' is not a directory", path.display())
            }
            Self::PermissionDenied { path, source } => {
                write!(
                    f,
                    "Permission denied accessing '{}': {source}",
                    path.display()
                )
            }
            Self::Traversal { path, source } => {
                write!(f, "Error listing '{}': {source}", path.display())
            }
            Self::InvalidPattern { pattern, source } => {
                write!(f, "Invalid log file pattern '{pattern}': {source}")
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PermissionDenied { source, .. } => Some(source),
            Self::Traversal { source, .. } => Some(source),
            Self::InvalidPattern { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DiscoveryError> for LogRelayError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// Reasons a single log line failed to decode into a record.
#[derive(Debug)]
pub enum ParseError {
    /// The line is not valid JSON.
    Json(serde_json::Error),

    /// The line is valid JSON but not an object.
    NotAnObject { kind: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid JSON record: {e}"),
            Self::NotAnObject { kind } => {
                write!(f, "expected a JSON object, found {kind}")
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::NotAnObject { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ranged read errors
// ---------------------------------------------------------------------------

/// Errors from reading a byte range of a file.
#[derive(Debug)]
pub enum ReadError {
    /// The open/stat/seek/read itself failed.
    Io { path: PathBuf, source: io::Error },

    /// The read did not complete before the deadline and was abandoned.
    Timeout { path: PathBuf, timeout_ms: u64 },

    /// An earlier timed-out read of this file has still not returned.
    Busy { path: PathBuf },
}

impl ReadError {
    /// True when the file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "'{}': read failed: {source}", path.display())
            }
            Self::Timeout { path, timeout_ms } => write!(
                f,
                "'{}': read did not complete within {timeout_ms} ms",
                path.display()
            ),
            Self::Busy { path } => write!(
                f,
                "'{}': previous read has not returned yet",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Timeout { .. } | Self::Busy { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tail errors
// ---------------------------------------------------------------------------

/// Errors raised while processing new content of a tailed file.
/// All of them are transient: state is left unchanged and the next trigger
/// retries.
#[derive(Debug)]
pub enum TailError {
    /// The unread range could not be read.
    Read(ReadError),

    /// The path was never discovered, so it has no offset.
    Untracked { path: PathBuf },

    /// A caller tried to move an offset backwards without a reset.
    OffsetRegression {
        path: PathBuf,
        current: u64,
        requested: u64,
    },
}

impl fmt::Display for TailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(e) => write!(f, "{e}"),
            Self::Untracked { path } => {
                write!(f, "'{}' is not a tracked log file", path.display())
            }
            Self::OffsetRegression {
                path,
                current,
                requested,
            } => write!(
                f,
                "'{}': refusing to move offset back from {current} to {requested}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e),
            Self::Untracked { .. } | Self::OffsetRegression { .. } => None,
        }
    }
}

impl From<ReadError> for TailError {
    fn from(e: ReadError) -> Self {
        Self::Read(e)
    }
}

// ---------------------------------------------------------------------------
// History errors
// ---------------------------------------------------------------------------

/// Errors raised while serving a history request.
#[derive(Debug)]
pub enum HistoryError {
    /// No file is registered for the requested domain.
    UnknownDomain { domain: String },

    /// The domain's file no longer exists.
    Vanished { path: PathBuf },

    /// The trailing window could not be read.
    Read(ReadError),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDomain { domain } => write!(f, "unknown domain '{domain}'"),
            Self::Vanished { path } => {
                write!(f, "'{}' no longer exists", path.display())
            }
            Self::Read(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HistoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ReadError> for HistoryError {
    fn from(e: ReadError) -> Self {
        Self::Read(e)
    }
}

// ---------------------------------------------------------------------------
// Watch errors
// ---------------------------------------------------------------------------

/// Errors related to the native filesystem event source.
#[derive(Debug)]
pub enum WatchError {
    /// The platform watcher backend could not be created.
    Init { source: notify::Error },

    /// The log directory could not be registered with the watcher.
    Watch {
        path: PathBuf,
        source: notify::Error,
    },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { source } => {
                write!(f, "file watcher initialisation failed: {source}")
            }
            Self::Watch { path, source } => {
                write!(f, "cannot watch '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Init { source } => Some(source),
            Self::Watch { source, .. } => Some(source),
        }
    }
}

impl From<WatchError> for LogRelayError {
    fn from(e: WatchError) -> Self {
        Self::Watch(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for LogRelayError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Server errors
// ---------------------------------------------------------------------------

/// Errors related to the subscription listener.
#[derive(Debug)]
pub enum ServerError {
    /// The listener socket could not be bound.
    Bind { addr: String, source: io::Error },

    /// The bound socket's local address could not be read.
    LocalAddr { source: io::Error },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "cannot bind '{addr}': {source}"),
            Self::LocalAddr { source } => {
                write!(f, "cannot read listener address: {source}")
            }
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::LocalAddr { source } => Some(source),
        }
    }
}

impl From<ServerError> for LogRelayError {
    fn from(e: ServerError) -> Self {
        Self::Server(e)
    }
}
