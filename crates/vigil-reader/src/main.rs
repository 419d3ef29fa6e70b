//! vigil-reader - the consumer daemon.
//!
//! Attaches to the shared event queue (never re-initializing it), bootstraps
//! the chain head from the mutable name, and runs the worker pool plus a
//! periodic flusher. Workers shape raw events into log entries and append
//! them to the batch pipeline; the pipeline flushes on size or age, sealing
//! and publishing each batch. Shutdown forces a final flush so no buffered
//! entry is left behind.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vigil_core::batch::{FLUSH_TICK, WORKER_IDLE_SLEEP};
use vigil_core::cas::KuboCli;
use vigil_core::chain::ChainHead;
use vigil_core::crypto::HybridSealer;
use vigil_core::publish::{Pipeline, Publisher};
use vigil_core::queue::EventQueue;
use vigil_core::shm::SharedRegion;
use vigil_core::shutdown::RunFlag;
use vigil_core::{Config, LogEntry};

/// Worker threads draining the queue.
const NUM_WORKERS: usize = 4;

/// vigil reader - drains the shared queue and publishes encrypted batches
#[derive(Parser, Debug)]
#[command(name = "vigil-reader")]
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

fn worker_loop(id: usize, queue: &EventQueue, pipeline: &Pipeline, run: RunFlag) {
    while run.is_running() {
        match queue.dequeue() {
            Some(event) => {
                let entry = LogEntry::from_raw(&event);
                debug!(worker = id, kind = %entry.kind, message = %entry.message, "event dequeued");
                if let Err(err) = pipeline.ingest(&entry) {
                    warn!(worker = id, %err, "entry dropped, could not be serialized");
                    continue;
                }
                if let Err(err) = pipeline.flush_if_due(false) {
                    warn!(worker = id, %err, "batch publish failed, will retry");
                }
            }
            None => std::thread::sleep(WORKER_IDLE_SLEEP),
        }
    }
}

fn flusher_loop(pipeline: &Pipeline, run: RunFlag) {
    while run.is_running() {
        std::thread::sleep(FLUSH_TICK);
        if let Err(err) = pipeline.flush_if_due(false) {
            warn!(%err, "batch publish failed, will retry");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = Config::load(&args.config).context("failed to load configuration")?;
    config.ensure_directories().context("failed to create runtime directories")?;

    let run = RunFlag::install().context("failed to install signal handlers")?;

    let cas = KuboCli {
        publish_ttl_secs: config.ipfs.publish_ttl_secs,
        allow_offline: config.ipfs.allow_offline,
        resolve_timeout_secs: config.ipfs.resolve_timeout_secs,
    };

    let chain = ChainHead::new();
    chain.bootstrap(&cas, &config.ipfs.key_label);
    info!(head = %chain.current(), "chain head ready");

    let sealer = HybridSealer::from_pem_file(&config.keys.public_key)
        .context("failed to load the batch public key")?;
    let publisher = Publisher::new(
        sealer,
        Box::new(cas),
        config.ipfs.key_label.clone(),
        config.envelope_path(),
    );
    let pipeline = Pipeline::new(publisher, chain);

    let region: SharedRegion<EventQueue> = SharedRegion::attach(&config.paths.queue_file)
        .context("failed to attach to the shared event queue (is the agent running?)")?;
    info!(queue = %config.paths.queue_file.display(), workers = NUM_WORKERS, "reader ready");

    std::thread::scope(|scope| {
        let queue = region.get();
        let pipeline = &pipeline;
        for id in 0..NUM_WORKERS {
            scope.spawn(move || worker_loop(id, queue, pipeline, run));
        }
        scope.spawn(move || flusher_loop(pipeline, run));
    });

    // Residual entries get one forced flush on the way out.
    match pipeline.flush_if_due(true) {
        Ok(Some(cid)) => info!(%cid, "final batch published"),
        Ok(None) => {}
        Err(err) => warn!(%err, pending = pipeline.pending(), "final flush failed"),
    }

    info!("reader stopped");
    Ok(())
}
