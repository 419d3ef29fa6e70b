//! Batch publication: serialize, seal, put, and advance the chain head.
//!
//! [`Pipeline`] is the reader-side heart: workers append shaped entries, and
//! any thread (worker, flusher, or the shutdown path) may invoke the flush
//! trigger. The whole flush - payload serialization, hybrid encryption,
//! envelope write, CAS put, and name update - runs under the spool mutex, so
//! batch publication order matches flush order and two flushes can never
//! race the chain head out of order.
//!
//! A flush whose serialization, sealing, or CAS put fails restores the
//! drained entries to the spool and leaves the flush clock untouched; the
//! next flusher tick retries. A name-pointer update failure after a
//! successful put is only logged: the CID is already stored and the next
//! payload will embed it, so the chain stays intact even while the head
//! pointer lags.

use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::{BatchPayload, LogEntry, Spool};
use crate::cas::{Cas, CasError};
use crate::chain::ChainHead;
use crate::crypto::{CryptoError, HybridSealer};

/// Errors from a batch flush.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload or an entry failed to serialize.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The payload could not be sealed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The envelope file could not be written.
    #[error("failed to write envelope file: {0}")]
    EnvelopeWrite(#[from] std::io::Error),

    /// The content-addressed store rejected the envelope.
    #[error(transparent)]
    Cas(#[from] CasError),
}

/// Seals envelopes and pushes them to the store.
pub struct Publisher {
    sealer: HybridSealer,
    cas: Box<dyn Cas>,
    key_label: String,
    envelope_path: PathBuf,
}

impl Publisher {
    /// Assembles a publisher.
    ///
    /// `envelope_path` is the scratch file the sealed envelope is written to
    /// before the CAS put; it is overwritten on every flush.
    #[must_use]
    pub fn new(
        sealer: HybridSealer,
        cas: Box<dyn Cas>,
        key_label: impl Into<String>,
        envelope_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sealer,
            cas,
            key_label: key_label.into(),
            envelope_path: envelope_path.into(),
        }
    }

    /// Seals and stores one payload, returning its CID.
    ///
    /// The name-pointer update is best-effort; see the module docs.
    pub fn publish(&self, payload: &BatchPayload) -> Result<String, PublishError> {
        let plaintext = payload.to_pretty_json()?;
        let envelope = self.sealer.seal(&plaintext)?;
        std::fs::write(&self.envelope_path, envelope.to_json()?)?;

        let cid = self.cas.put(&self.envelope_path)?;
        if let Err(err) = self.cas.name_publish(&self.key_label, &cid) {
            warn!(%err, %cid, "stored batch but failed to move the name head");
        }
        Ok(cid)
    }
}

/// The reader-side ingestion and flush pipeline.
pub struct Pipeline {
    spool: Mutex<Spool>,
    publisher: Publisher,
    chain: ChainHead,
}

impl Pipeline {
    /// Builds a pipeline around a publisher and an already-bootstrapped
    /// chain head.
    #[must_use]
    pub fn new(publisher: Publisher, chain: ChainHead) -> Self {
        Self {
            spool: Mutex::new(Spool::new()),
            publisher,
            chain,
        }
    }

    /// Appends one shaped entry to the current batch.
    pub fn ingest(&self, entry: &LogEntry) -> Result<(), PublishError> {
        let json = serde_json::to_string(entry)?;
        self.spool
            .lock()
            .expect("spool mutex poisoned")
            .append(json);
        Ok(())
    }

    /// Runs the flush trigger. Returns the published CID when a flush
    /// happened, `None` when nothing was due.
    pub fn flush_if_due(&self, force: bool) -> Result<Option<String>, PublishError> {
        let mut spool = self.spool.lock().expect("spool mutex poisoned");
        if !spool.is_due(force) {
            return Ok(None);
        }

        let staged = spool.drain();
        let count = staged.len();
        let prev_cid = self.chain.current();
        let payload = BatchPayload::new(staged, &prev_cid);

        match self.publisher.publish(&payload) {
            Ok(cid) => {
                spool.mark_flushed();
                self.chain.advance(cid.clone());
                info!(%cid, %prev_cid, entries = count, "published batch");
                Ok(Some(cid))
            }
            Err(err) => {
                debug!(entries = count, "restoring spool after failed publish");
                spool.restore(payload.into_logs());
                Err(err)
            }
        }
    }

    /// Current chain head, mainly for logging and tests.
    #[must_use]
    pub fn chain_head(&self) -> String {
        self.chain.current()
    }

    /// Number of entries waiting in the spool.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.spool.lock().expect("spool mutex poisoned").len()
    }
}
