//! vigil-agent - the producer daemon.
//!
//! Creates and initializes the shared event queue, starts the three
//! watchers (syslog tail, USB hotplug, file deletion), and then supervises:
//! it reports readiness to an attached service manager and heartbeats the
//! watchdog until a shutdown signal arrives, after which it waits for every
//! watcher thread to exit.

mod watch;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vigil_core::event::EventCounter;
use vigil_core::patterns::PatternSet;
use vigil_core::queue::EventQueue;
use vigil_core::sd_notify;
use vigil_core::shm::SharedRegion;
use vigil_core::shutdown::RunFlag;
use vigil_core::Config;

/// Liveness heartbeat cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(200);

/// vigil agent - watches host event sources and feeds the shared queue
#[derive(Parser, Debug)]
#[command(name = "vigil-agent")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = Config::load(&args.config).context("failed to load configuration")?;
    config.ensure_directories().context("failed to create runtime directories")?;

    let run = RunFlag::install().context("failed to install signal handlers")?;
    let patterns = PatternSet::load(&config.paths.pattern_file);
    info!(patterns = patterns.len(), "loaded pattern set");

    let region: SharedRegion<EventQueue> = SharedRegion::create(&config.paths.queue_file)
        .context("failed to create shared event queue")?;
    region.get().init();
    info!(queue = %config.paths.queue_file.display(), "shared event queue initialized");

    let counter = EventCounter::new();

    std::thread::scope(|scope| {
        let ctx = watch::WatchCtx {
            queue: region.get(),
            counter: &counter,
            run,
        };

        let syslog_path = &config.paths.syslog;
        let patterns = &patterns;
        scope.spawn(move || {
            if let Err(err) = watch::syslog::run(ctx, syslog_path, patterns) {
                error!(%err, "syslog watcher stopped");
            }
        });

        scope.spawn(move || {
            if let Err(err) = watch::usb::run(ctx) {
                error!(%err, "USB watcher stopped");
            }
        });

        let watch_dirs = &config.paths.watch_paths;
        scope.spawn(move || {
            if let Err(err) = watch::fsdelete::run(ctx, watch_dirs) {
                error!(%err, "deletion watcher stopped");
            }
        });

        sd_notify::notify_ready();
        info!("agent ready");

        while run.is_running() {
            std::thread::sleep(HEARTBEAT_INTERVAL);
            sd_notify::notify_watchdog();
        }

        sd_notify::notify_stopping();
        info!("shutdown requested, waiting for watchers");
    });

    info!("agent stopped");
    Ok(())
}
