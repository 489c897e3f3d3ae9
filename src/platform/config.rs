// LogRelay - platform/config.rs
//
// Configuration file resolution and config.toml loading with startup
// validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance when no explicit --config path is given.

use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Platform-default location of config.toml, or `None` when no home/config
/// directory can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", constants::APP_ID)?;
    let path = dirs.config_dir().join(constants::CONFIG_FILE_NAME);
    tracing::debug!(path = %path.display(), "Platform config path resolved");
    Some(path)
}

// =============================================================================
// Enumerated settings
// =============================================================================

/// Which change-detection sources run alongside the always-on poll source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// Try native notifications; fall back to poll-only if unavailable.
    #[default]
    Auto,
    /// Require native notifications; failure to start them is fatal.
    Native,
    /// Poll only. Use this for network file systems where notifications are
    /// unreliable.
    Poll,
}

impl FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "native" => Ok(WatchMode::Native),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{s}'. Valid options: auto, native, poll"
            )),
        }
    }
}

/// What the tail reader does with bytes after the last line terminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingLinePolicy {
    /// Leave the offset at the last terminator and re-read the fragment next
    /// cycle. Safe for producers that write a record and its newline in
    /// separate operations.
    #[default]
    AwaitTerminator,
    /// Advance the offset to the observed size and parse the fragment as-is.
    /// Only lossless when the producer writes whole lines atomically.
    Consume,
}

impl FromStr for TrailingLinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "await_terminator" => Ok(TrailingLinePolicy::AwaitTerminator),
            "consume" => Ok(TrailingLinePolicy::Consume),
            _ => Err(format!(
                "Invalid trailing line policy '{s}'. Valid options: await_terminator, consume"
            )),
        }
    }
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility -- a newer
/// config file can be used with an older binary without crashing.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// `[logs]` section.
    pub logs: LogsSection,
    /// `[tail]` section.
    pub tail: TailSection,
    /// `[history]` section.
    pub history: HistorySection,
    /// `[server]` section.
    pub server: ServerSection,
    /// `[logging]` section.
    pub logging: LoggingSection,
}

/// `[logs]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LogsSection {
    /// Directory holding one log file per domain.
    pub dir: Option<String>,
    /// Filename glob for log files.
    pub pattern: Option<String>,
    /// "auto", "native" or "poll".
    pub watch_mode: Option<String>,
}

/// `[tail]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct TailSection {
    pub poll_interval_ms: Option<u64>,
    pub rescan_interval_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub worker_threads: Option<usize>,
    /// "await_terminator" or "consume".
    pub trailing_lines: Option<String>,
}

/// `[history]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub window_bytes: Option<u64>,
}

/// `[server]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Listen address for the subscription protocol, e.g. "127.0.0.1:7070".
    pub bind: Option<String>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

/// Validated application configuration derived from `config.toml`.
///
/// All values are validated against named constants at load time.
/// Invalid values produce actionable warnings and fall back to defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Logs --
    pub log_dir: PathBuf,
    pub pattern: String,
    pub watch_mode: WatchMode,

    // -- Tail --
    pub poll_interval: Duration,
    pub rescan_interval: Duration,
    pub read_timeout: Duration,
    pub worker_threads: usize,
    pub trailing_lines: TrailingLinePolicy,

    // -- History --
    pub history_window_bytes: u64,

    // -- Server --
    pub bind_addr: String,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(constants::DEFAULT_LOG_DIR),
            pattern: constants::DEFAULT_LOG_PATTERN.to_string(),
            watch_mode: WatchMode::default(),
            poll_interval: Duration::from_millis(constants::DEFAULT_POLL_INTERVAL_MS),
            rescan_interval: Duration::from_millis(constants::DEFAULT_RESCAN_INTERVAL_MS),
            read_timeout: Duration::from_millis(constants::DEFAULT_READ_TIMEOUT_MS),
            worker_threads: constants::DEFAULT_WORKER_THREADS,
            trailing_lines: TrailingLinePolicy::default(),
            history_window_bytes: constants::DEFAULT_HISTORY_WINDOW_BYTES,
            bind_addr: constants::DEFAULT_BIND_ADDR.to_string(),
            log_level: None,
        }
    }
}

/// Read and deserialise the config file at `config_path`.
///
/// Returns `Ok(None)` when the file does not exist (first run).
pub fn read_config_file(config_path: &Path) -> Result<Option<RawConfig>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
        path: config_path.to_path_buf(),
        source,
    })?;
    let raw = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: config_path.to_path_buf(),
        source,
    })?;
    Ok(Some(raw))
}

/// Load and validate the config file at `config_path`.
///
/// Returns `AppConfig` with validated values and a list of non-fatal warnings.
/// If the file does not exist, returns defaults with no warnings (first-run).
/// If the file is unreadable or unparseable, returns defaults with a warning:
/// the engine still starts but the operator is informed.
pub fn load_config(config_path: &Path) -> (AppConfig, Vec<String>) {
    match read_config_file(config_path) {
        Ok(Some(raw)) => {
            tracing::info!(path = %config_path.display(), "Loaded config.toml");
            validate(raw)
        }
        Ok(None) => {
            tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
            (AppConfig::default(), Vec::new())
        }
        Err(e) => {
            let msg = format!("{e}. Using defaults.");
            tracing::warn!("{}", msg);
            (AppConfig::default(), vec![msg])
        }
    }
}

impl AppConfig {
    /// Apply a poll interval given on the command line. Unlike file values,
    /// a bad CLI value is rejected outright.
    pub fn set_poll_interval_ms(&mut self, ms: u64) -> Result<(), ConfigError> {
        self.poll_interval = ranged_millis(
            "--poll-interval-ms",
            ms,
            constants::MIN_POLL_INTERVAL_MS,
            constants::MAX_POLL_INTERVAL_MS,
            constants::DEFAULT_POLL_INTERVAL_MS,
        )
        .map_err(|_| ConfigError::ValueOutOfRange {
            field: "--poll-interval-ms".to_string(),
            value: ms.to_string(),
            expected: format!(
                "{}-{}",
                constants::MIN_POLL_INTERVAL_MS,
                constants::MAX_POLL_INTERVAL_MS
            ),
        })?;
        Ok(())
    }
}

/// Validate every field of `raw` against named constants, accumulating all
/// problems instead of stopping at the first.
pub fn validate(raw: RawConfig) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let mut config = AppConfig::default();

    // -- Logs --
    if let Some(dir) = raw.logs.dir {
        if dir.trim().is_empty() {
            warnings.push(format!(
                "[logs] dir is empty. Using default ({}).",
                constants::DEFAULT_LOG_DIR
            ));
        } else {
            config.log_dir = PathBuf::from(dir);
        }
    }

    if let Some(pattern) = raw.logs.pattern {
        match glob::Pattern::new(&pattern) {
            Ok(_) => config.pattern = pattern,
            Err(e) => warnings.push(format!(
                "[logs] pattern = \"{pattern}\" is not a valid glob ({e}). Using default ({}).",
                constants::DEFAULT_LOG_PATTERN
            )),
        }
    }

    if let Some(mode) = raw.logs.watch_mode {
        match mode.parse::<WatchMode>() {
            Ok(m) => config.watch_mode = m,
            Err(e) => warnings.push(format!("[logs] {e}. Using default (auto).")),
        }
    }

    // -- Tail --
    if let Some(ms) = raw.tail.poll_interval_ms {
        match ranged_millis(
            "[tail] poll_interval_ms",
            ms,
            constants::MIN_POLL_INTERVAL_MS,
            constants::MAX_POLL_INTERVAL_MS,
            constants::DEFAULT_POLL_INTERVAL_MS,
        ) {
            Ok(d) => config.poll_interval = d,
            Err(w) => warnings.push(w),
        }
    }

    if let Some(ms) = raw.tail.rescan_interval_ms {
        match ranged_millis(
            "[tail] rescan_interval_ms",
            ms,
            constants::MIN_RESCAN_INTERVAL_MS,
            constants::MAX_RESCAN_INTERVAL_MS,
            constants::DEFAULT_RESCAN_INTERVAL_MS,
        ) {
            Ok(d) => config.rescan_interval = d,
            Err(w) => warnings.push(w),
        }
    }

    if let Some(ms) = raw.tail.read_timeout_ms {
        match ranged_millis(
            "[tail] read_timeout_ms",
            ms,
            constants::MIN_READ_TIMEOUT_MS,
            constants::MAX_READ_TIMEOUT_MS,
            constants::DEFAULT_READ_TIMEOUT_MS,
        ) {
            Ok(d) => config.read_timeout = d,
            Err(w) => warnings.push(w),
        }
    }

    if let Some(n) = raw.tail.worker_threads {
        if (1..=constants::MAX_WORKER_THREADS).contains(&n) {
            config.worker_threads = n;
        } else {
            warnings.push(format!(
                "[tail] worker_threads = {n} is out of range (1-{}). Using default ({}).",
                constants::MAX_WORKER_THREADS,
                constants::DEFAULT_WORKER_THREADS,
            ));
        }
    }

    if let Some(policy) = raw.tail.trailing_lines {
        match policy.parse::<TrailingLinePolicy>() {
            Ok(p) => config.trailing_lines = p,
            Err(e) => warnings.push(format!("[tail] {e}. Using default (await_terminator).")),
        }
    }

    // -- History --
    if let Some(bytes) = raw.history.window_bytes {
        if (constants::MIN_HISTORY_WINDOW_BYTES..=constants::MAX_HISTORY_WINDOW_BYTES)
            .contains(&bytes)
        {
            config.history_window_bytes = bytes;
        } else {
            warnings.push(format!(
                "[history] window_bytes = {bytes} is out of range ({}-{}). Using default ({}).",
                constants::MIN_HISTORY_WINDOW_BYTES,
                constants::MAX_HISTORY_WINDOW_BYTES,
                constants::DEFAULT_HISTORY_WINDOW_BYTES,
            ));
        }
    }

    // -- Server --
    if let Some(bind) = raw.server.bind {
        if bind.parse::<std::net::SocketAddr>().is_ok() {
            config.bind_addr = bind;
        } else {
            warnings.push(format!(
                "[server] bind = \"{bind}\" is not a socket address (host:port). Using default ({}).",
                constants::DEFAULT_BIND_ADDR
            ));
        }
    }

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.clone());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    (config, warnings)
}

fn ranged_millis(
    field: &str,
    value: u64,
    min: u64,
    max: u64,
    default: u64,
) -> Result<Duration, String> {
    if (min..=max).contains(&value) {
        Ok(Duration::from_millis(value))
    } else {
        Err(format!(
            "{field} = {value} is out of range ({min}-{max}). Using default ({default})."
        ))
    }
}
