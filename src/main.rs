// LogRelay - main.rs
//
// Application entry point. Handles:
// 1. CLI argument parsing
// 2. Configuration loading (config.toml + CLI overrides)
// 3. Logging initialisation (debug mode support)
// 4. Engine startup
// 5. Subscription listener and/or --follow output

use clap::Parser;
use logrelay::app::engine::Engine;
use logrelay::app::server::{encode_event, Server};
use logrelay::core::model::ServerEvent;
use logrelay::platform::config::{self, WatchMode};
use logrelay::util;
use logrelay::util::error::LogRelayError;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// LogRelay - tails per-domain JSON access logs and streams new records to
/// subscribers.
///
/// Point LogRelay at the directory your web server writes one access log per
/// site into. New lines are parsed and pushed to connected clients over a
/// line-delimited JSON protocol.
#[derive(Parser, Debug)]
#[command(name = "logrelay", version, about)]
struct Cli {
    /// Directory holding one log file per domain.
    #[arg(env = "LOG_DIR")]
    dir: Option<PathBuf>,

    /// Path to config.toml (defaults to the platform config directory).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Filename glob for log files, e.g. "*.log".
    #[arg(short = 'p', long = "pattern")]
    pattern: Option<String>,

    /// Listen address for subscribers, e.g. 127.0.0.1:7070.
    #[arg(short = 'b', long = "bind")]
    bind: Option<String>,

    /// Poll interval in milliseconds.
    #[arg(long = "poll-interval-ms")]
    poll_interval_ms: Option<u64>,

    /// Disable native file notifications and rely on polling only.
    #[arg(long = "poll-only")]
    poll_only: bool,

    /// Do not start the subscription listener.
    #[arg(long = "no-server")]
    no_server: bool,

    /// Print every record on the all-domains feed to stdout, one per line.
    #[arg(short = 'f', long = "follow")]
    follow: bool,

    /// With --follow, print raw `record_any` JSON events instead of text.
    #[arg(long = "json", requires = "follow")]
    json: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    // Config is read before logging is up; its warnings are replayed below.
    let config_path = cli.config.clone().or_else(config::default_config_path);
    let (mut app_config, warnings) = match config_path.as_deref() {
        Some(path) => config::load_config(path),
        None => (config::AppConfig::default(), Vec::new()),
    };

    util::logging::init(cli.debug, app_config.log_level.as_deref());

    tracing::info!(
        version = util::constants::APP_VERSION,
        debug = cli.debug,
        "LogRelay starting"
    );
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    if let Err(e) = apply_cli_overrides(&cli, &mut app_config) {
        fail(&e);
    }

    tracing::info!(
        dir = %app_config.log_dir.display(),
        pattern = %app_config.pattern,
        watch_mode = ?app_config.watch_mode,
        poll_ms = app_config.poll_interval.as_millis() as u64,
        trailing_lines = ?app_config.trailing_lines,
        "Configuration resolved"
    );

    let engine = match Engine::start(&app_config) {
        Ok(engine) => engine,
        Err(e) => fail(&e),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let server = if cli.no_server {
        None
    } else {
        match Server::bind(&app_config.bind_addr, Arc::clone(engine.core())) {
            Ok(server) => Some(server),
            Err(e) => fail(&LogRelayError::from(e)),
        }
    };

    match (server, cli.follow) {
        (Some(server), true) => {
            let cancel = Arc::clone(&cancel);
            let spawned = std::thread::Builder::new()
                .name("listener".to_string())
                .spawn(move || {
                    if let Err(e) = server.run(cancel) {
                        tracing::error!(error = %e, "Subscription listener failed");
                    }
                });
            if let Err(e) = spawned {
                tracing::error!(error = %e, "Failed to spawn listener thread");
            }
            follow(&engine, cli.json);
        }
        (Some(server), false) => {
            if let Err(e) = server.run(cancel) {
                fail(&LogRelayError::from(e));
            }
        }
        (None, true) => follow(&engine, cli.json),
        (None, false) => {
            tracing::warn!("Listener disabled and --follow not given; records are only logged");
            loop {
                std::thread::park();
            }
        }
    }
}

fn apply_cli_overrides(
    cli: &Cli,
    app_config: &mut config::AppConfig,
) -> Result<(), LogRelayError> {
    if let Some(ref dir) = cli.dir {
        app_config.log_dir = dir.clone();
    }
    if let Some(ref pattern) = cli.pattern {
        app_config.pattern = pattern.clone();
    }
    if let Some(ref bind) = cli.bind {
        app_config.bind_addr = bind.clone();
    }
    if let Some(ms) = cli.poll_interval_ms {
        app_config.set_poll_interval_ms(ms)?;
    }
    if cli.poll_only {
        app_config.watch_mode = WatchMode::Poll;
    }
    Ok(())
}

/// Print the all-domains feed to stdout until the process is killed.
fn follow(engine: &Engine, json: bool) {
    let subscription = engine.core().connect();
    let stdout = std::io::stdout();
    for event in subscription.events.iter() {
        let ServerEvent::RecordAny { domain, entry } = &event else {
            continue;
        };
        let bytes = if json {
            match encode_event(&event) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            }
        } else {
            format!("{}\n", entry.summary(domain)).into_bytes()
        };
        let mut out = stdout.lock();
        if out.write_all(&bytes).and_then(|()| out.flush()).is_err() {
            // stdout closed (e.g. piped into `head`).
            break;
        }
    }
}

fn fail(e: &LogRelayError) -> ! {
    tracing::error!(error = %e, "Fatal startup error");
    eprintln!("Error: {e}");
    std::process::exit(1);
}
