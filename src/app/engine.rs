// LogRelay - app/engine.rs
//
// Engine orchestration: owns the shared registries and wires the change
// detection sources to the tail reader and the fan-out hub.
//
// `EngineCore` holds all shared state and is passed by `Arc` to every
// background component; it has no threads of its own and can be driven
// directly in tests. `Engine` is the running instance: a dispatcher pool,
// an optional native event source and the poll source, all stopped on drop.
//
// Startup order:
//   1. Dispatcher (so events have somewhere to go).
//   2. Native event source (so files created during the scan are not missed).
//   3. Startup scan: every matching file is discovered with its offset at
//      end of file.
//   4. Poll source.

use crate::app::dispatch::Dispatcher;
use crate::app::fanout::{Hub, SubscriberId, Subscription};
use crate::app::history;
use crate::app::poller::PollSource;
use crate::app::tail::{self, TailReader};
use crate::app::watcher::{EventSource, FsChange};
use crate::core::discovery;
use crate::core::model::{ClientCommand, Record, ServerEvent, TailOutcome};
use crate::core::offsets::OffsetTracker;
use crate::core::registry::{self, DomainRegistry};
use crate::platform::config::{AppConfig, WatchMode};
use crate::util::error::{HistoryError, LogRelayError};
use glob::Pattern;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// EngineCore
// =============================================================================

/// Shared engine state: registry, offsets, hub and tail reader.
#[derive(Debug)]
pub struct EngineCore {
    log_dir: PathBuf,
    pattern: Pattern,
    registry: Arc<DomainRegistry>,
    offsets: Arc<OffsetTracker>,
    hub: Arc<Hub>,
    reader: TailReader,
    history_window: u64,
    read_timeout: Duration,
}

impl EngineCore {
    /// Build the shared state for `config`. Fails only on an invalid pattern.
    pub fn new(config: &AppConfig) -> Result<Self, LogRelayError> {
        let pattern = discovery::compile_pattern(&config.pattern)?;

        // Notification paths are built from the watched path; canonicalising
        // once keeps them comparable with scan results. A directory that does
        // not exist yet is kept as given.
        let log_dir = config
            .log_dir
            .canonicalize()
            .unwrap_or_else(|_| config.log_dir.clone());

        let registry = Arc::new(DomainRegistry::new());
        let offsets = Arc::new(OffsetTracker::new());
        let hub = Arc::new(Hub::new());
        let reader = TailReader::new(
            Arc::clone(&registry),
            Arc::clone(&offsets),
            Arc::clone(&hub),
            config.trailing_lines,
            config.read_timeout,
        );

        Ok(Self {
            log_dir,
            pattern,
            registry,
            offsets,
            hub,
            reader,
            history_window: config.history_window_bytes,
            read_timeout: config.read_timeout,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Discover a log file: register its domain, start its offset at the
    /// current end of file and announce the domain if it is new.
    ///
    /// Returns the domain when this call started tracking the path. Paths
    /// that are already tracked are left untouched, so repeated creation
    /// events and rescans never move an offset. When the event source and a
    /// rescan race on a new file, only one of them gets `Some`.
    pub fn add_file(&self, path: &Path) -> Option<String> {
        let domain = registry::domain_for(path)?;
        let offset = self.offsets.init_at_end(path, &domain)?;
        let discovery = self.registry.discover(path)?;
        self.hub.announce(&discovery.domain);

        tracing::info!(
            domain = %domain,
            file = %path.display(),
            offset,
            new_domain = discovery.is_new_domain,
            "Log file discovered"
        );
        Some(domain)
    }

    /// List the log directory and discover every matching file.
    ///
    /// An unusable directory is logged as a configuration problem and the
    /// engine carries on with what it has; later rescans or creation events
    /// self-heal once the directory appears. Returns the number of files newly
    /// discovered.
    pub fn scan(&self) -> usize {
        self.scan_until(&AtomicBool::new(false))
    }

    /// `scan`, stopping early once `cancel` is set.
    pub fn scan_until(&self, cancel: &AtomicBool) -> usize {
        let files = match discovery::scan_log_dir(&self.log_dir, &self.pattern) {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "Log directory scan failed; check [logs] dir");
                return 0;
            }
        };
        files
            .iter()
            .take_while(|_| !cancel.load(Ordering::Relaxed))
            .filter(|p| self.add_file(p).is_some())
            .count()
    }

    /// Run one tail cycle for `path` and log the outcome.
    pub fn process(&self, path: &Path) -> TailOutcome {
        let outcome = self.reader.process(path);
        tail::log_outcome(path, &outcome);
        outcome
    }

    /// Register a new subscriber; known domains are replayed to it.
    pub fn connect(&self) -> Subscription {
        self.hub.connect()
    }

    pub fn disconnect(&self, id: SubscriberId) {
        self.hub.disconnect(id);
    }

    /// Recent records of `domain`, read from disk.
    pub fn history(&self, domain: &str) -> Result<Vec<Record>, HistoryError> {
        history::fetch_history(
            &self.registry,
            domain,
            self.history_window,
            self.read_timeout,
        )
    }

    /// Apply one subscriber command.
    ///
    /// History is read on the calling thread and delivered to `id` only.
    /// Failures are logged; the subscriber just receives nothing.
    pub fn handle_command(&self, id: SubscriberId, command: ClientCommand) {
        match command {
            ClientCommand::Subscribe { domain } => {
                self.hub.subscribe(id, &domain);
            }
            ClientCommand::Unsubscribe { domain } => {
                self.hub.unsubscribe(id, &domain);
            }
            ClientCommand::SubscribeAll => {
                self.hub.set_all_feed(id, true);
            }
            ClientCommand::UnsubscribeAll => {
                self.hub.set_all_feed(id, false);
            }
            ClientCommand::RequestHistory { domain } => match self.history(&domain) {
                Ok(records) => {
                    let count = records.len();
                    let events = records
                        .into_iter()
                        .map(|r| ServerEvent::Record {
                            domain: domain.clone(),
                            entry: Arc::new(r),
                        })
                        .collect();
                    if self.hub.deliver_to(id, events) {
                        tracing::debug!(subscriber = id, domain = %domain, records = count, "History sent");
                    }
                }
                Err(e) => {
                    tracing::warn!(subscriber = id, domain = %domain, error = %e, "History request failed");
                }
            },
        }
    }
}

// =============================================================================
// Engine (running instance)
// =============================================================================

/// A running engine: dispatcher, event source and poll source.
pub struct Engine {
    core: Arc<EngineCore>,
    dispatcher: Arc<Dispatcher>,
    watcher: Option<EventSource>,
    poller: Option<PollSource>,
}

impl Engine {
    /// Build the core and start every background component.
    ///
    /// Fails on an invalid filename pattern, or when `watch_mode = native`
    /// and the native watcher cannot be started.
    pub fn start(config: &AppConfig) -> Result<Self, LogRelayError> {
        let core = Arc::new(EngineCore::new(config)?);

        let dispatcher = {
            let core = Arc::clone(&core);
            Arc::new(Dispatcher::start(config.worker_threads, move |path: &Path| {
                core.process(path);
            }))
        };

        let watcher = match config.watch_mode {
            WatchMode::Poll => {
                tracing::info!("Native file watcher disabled; polling only");
                None
            }
            WatchMode::Auto | WatchMode::Native => {
                let handler = {
                    let core = Arc::clone(&core);
                    let dispatcher = Arc::clone(&dispatcher);
                    move |change: FsChange| match change {
                        FsChange::Added(path) => {
                            core.add_file(&path);
                        }
                        FsChange::Modified(path) => {
                            core.add_file(&path);
                            dispatcher.submit(&path);
                        }
                    }
                };
                match EventSource::start(core.log_dir(), core.pattern().clone(), handler) {
                    Ok(source) => Some(source),
                    Err(e) if config.watch_mode == WatchMode::Native => return Err(e.into()),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Native file watcher unavailable; continuing with polling only"
                        );
                        None
                    }
                }
            }
        };

        let discovered = core.scan();
        tracing::info!(
            dir = %core.log_dir().display(),
            files = discovered,
            domains = core.registry().len(),
            "Startup scan complete"
        );

        let poller = {
            let sweep_core = Arc::clone(&core);
            let sweep_dispatcher = Arc::clone(&dispatcher);
            let rescan_core = Arc::clone(&core);
            PollSource::start(
                config.poll_interval,
                config.rescan_interval,
                move || {
                    for path in sweep_core.registry().active_paths() {
                        sweep_dispatcher.submit(&path);
                    }
                },
                move |cancel: &AtomicBool| {
                    let found = rescan_core.scan_until(cancel);
                    if found > 0 {
                        tracing::info!(files = found, "Rescan discovered new log files");
                    }
                },
            )
        };

        Ok(Self {
            core,
            dispatcher,
            watcher,
            poller: Some(poller),
        })
    }

    pub fn core(&self) -> &Arc<EngineCore> {
        &self.core
    }

    /// True when native notifications are active.
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Queue a tail cycle for `path`, as either change source would.
    pub fn trigger(&self, path: &Path) -> bool {
        self.dispatcher.submit(path)
    }

    /// Block until the dispatcher has no queued or running work.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle(timeout)
    }

    /// Stop every background component. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.dispatcher.shutdown();
        tracing::info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.poller.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_for(dir: &Path) -> AppConfig {
        AppConfig {
            log_dir: dir.to_path_buf(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_scan_discovers_and_announces() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.com.log"), "{}\n").unwrap();
        fs::write(dir.path().join("b.com.log"), "").unwrap();
        fs::write(dir.path().join("readme.txt"), "").unwrap();

        let core = EngineCore::new(&config_for(dir.path())).unwrap();
        assert_eq!(core.scan(), 2);
        assert_eq!(core.scan(), 0, "rescan must not rediscover");
        assert_eq!(core.registry().list(), vec!["a.com", "b.com"]);
        assert_eq!(core.hub().announced(), vec!["a.com", "b.com"]);

        let a = core.log_dir().join("a.com.log");
        assert_eq!(core.offsets().get_offset(&a), Some(3));
    }

    #[test]
    fn test_racing_discovery_reports_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(EngineCore::new(&config_for(dir.path())).unwrap());
        let path = core.log_dir().join("race.com.log");
        fs::write(&path, "").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let core = Arc::clone(&core);
                let path = path.clone();
                std::thread::spawn(move || core.add_file(&path))
            })
            .collect();
        let added = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(added, 1);
        assert_eq!(core.scan(), 0);
        assert_eq!(core.registry().list(), vec!["race.com"]);
    }

    #[test]
    fn test_cancelled_scan_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.com.log"), "").unwrap();
        let core = EngineCore::new(&config_for(dir.path())).unwrap();

        assert_eq!(core.scan_until(&AtomicBool::new(true)), 0);
        assert!(core.registry().is_empty());
        assert_eq!(core.scan(), 1);
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let core = EngineCore::new(&config_for(&dir.path().join("absent"))).unwrap();
        assert_eq!(core.scan(), 0);
        assert!(core.registry().is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            pattern: "[*.log".to_string(),
            ..config_for(dir.path())
        };
        assert!(matches!(
            EngineCore::new(&config),
            Err(LogRelayError::Discovery(_))
        ));
    }

    #[test]
    fn test_commands_route_subscriptions_and_history() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.com.log"),
            "{\"status\":201}\n{\"status\":202}\n",
        )
        .unwrap();
        let core = EngineCore::new(&config_for(dir.path())).unwrap();
        core.scan();

        let sub = core.connect();
        let replay: Vec<_> = sub.events.try_iter().collect();
        assert_eq!(
            replay,
            vec![ServerEvent::DomainDiscovered {
                domain: "a.com".to_string()
            }]
        );

        core.handle_command(
            sub.id,
            ClientCommand::RequestHistory {
                domain: "a.com".to_string(),
            },
        );
        let history: Vec<u16> = sub
            .events
            .try_iter()
            .filter_map(|e| match e {
                ServerEvent::Record { entry, .. } => entry.status(),
                _ => None,
            })
            .collect();
        assert_eq!(history, vec![201, 202]);

        // Unknown domain: logged, nothing delivered.
        core.handle_command(
            sub.id,
            ClientCommand::RequestHistory {
                domain: "zzz".to_string(),
            },
        );
        assert!(sub.events.try_recv().is_err());

        core.handle_command(sub.id, ClientCommand::UnsubscribeAll);
        core.hub().publish("a.com", Arc::new(Record::default()));
        assert!(sub.events.try_recv().is_err());

        core.handle_command(
            sub.id,
            ClientCommand::Subscribe {
                domain: "a.com".to_string(),
            },
        );
        core.hub().publish("a.com", Arc::new(Record::default()));
        assert!(matches!(
            sub.events.try_recv(),
            Ok(ServerEvent::Record { .. })
        ));
    }

    #[test]
    fn test_engine_start_and_stop_poll_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            watch_mode: WatchMode::Poll,
            ..config_for(dir.path())
        };
        let mut engine = Engine::start(&config).unwrap();
        assert!(!engine.is_watching());
        engine.stop();
        engine.stop();
        assert!(!engine.trigger(Path::new("x.log")));
    }
}
