//! # vigil-core
//!
//! Core library for vigil - a host-resident security-telemetry pipeline.
//!
//! Two cooperating processes share this crate: the agent (producer) watches
//! kernel and userland event sources and pushes matched events into a
//! shared-memory ring queue; the reader (consumer) drains the queue, batches
//! the events, encrypts each batch under a hybrid cipher, and publishes the
//! ciphertext to IPFS behind an IPNS head pointer so batches form a
//! backward-linked chain.
//!
//! ## Features
//!
//! - **Shared-memory queue**: Wait-free MPMC ring over a memory-mapped file
//! - **Event model**: Fixed-layout records safe to carry across processes
//! - **Pattern matching**: Multi-pattern substring scanning for log lines
//! - **Batch publication**: Size-or-time batching, AES-256-GCM + RSA-OAEP
//!   envelopes, content-addressed publish with chained head updates
//!
//! ## Example
//!
//! ```rust,no_run
//! use vigil_core::event::{EventCounter, EventKind, RawEvent};
//! use vigil_core::queue::EventQueue;
//! use vigil_core::shm::SharedRegion;
//!
//! let region: SharedRegion<EventQueue> = SharedRegion::create("tmp/event_queue_shm")?;
//! region.get().init();
//!
//! let counter = EventCounter::new();
//! let event = RawEvent::new(EventKind::Syslog, counter.next(), "failed login from 10.0.0.7");
//! assert!(region.get().enqueue(&event));
//! # Ok::<(), vigil_core::shm::ShmError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod cas;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod event;
pub mod patterns;
pub mod publish;
pub mod queue;
pub mod sd_notify;
pub mod shm;
pub mod shutdown;

pub use batch::LogEntry;
pub use chain::ChainHead;
pub use config::Config;
pub use event::{EventCounter, EventKind, RawEvent};
pub use patterns::PatternSet;
pub use queue::{EventQueue, RingQueue};
pub use shm::SharedRegion;
