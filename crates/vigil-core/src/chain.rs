//! The chain head: the CID of the most recently published batch.
//!
//! Every payload embeds its predecessor's CID, so the published batches form
//! a backward-linked list from the mutable-name head down to genesis. The
//! head lives in process memory under its own mutex; it is read when a batch
//! is assembled and replaced only after a successful publish.

use tracing::{info, warn};

use crate::cas::{lookup_key_id, Cas};

/// Head value before any batch has been published in this chain.
pub const GENESIS: &str = "null";

/// Mutex-guarded chain head.
#[derive(Debug)]
pub struct ChainHead {
    cid: std::sync::Mutex<String>,
}

impl ChainHead {
    /// A head at genesis.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cid: std::sync::Mutex::new(GENESIS.to_string()),
        }
    }

    /// Adopts the CID the mutable name currently points at, if any.
    ///
    /// Resolution failures leave the head at genesis: a reader that cannot
    /// reach the resolver still publishes, starting a new chain segment.
    pub fn bootstrap(&self, cas: &dyn Cas, key_label: &str) {
        match lookup_key_id(cas, key_label).and_then(|id| cas.name_resolve(&id)) {
            Ok(Some(cid)) => {
                info!(%cid, "bootstrapped chain head from mutable name");
                self.set(cid);
            }
            Ok(None) => {
                info!("mutable name unresolved, chain starts at genesis");
            }
            Err(err) => {
                warn!(%err, "could not bootstrap chain head, starting at genesis");
            }
        }
    }

    /// The current head value.
    #[must_use]
    pub fn current(&self) -> String {
        self.cid.lock().expect("chain head mutex poisoned").clone()
    }

    /// Replaces the head after a successful publish.
    pub fn advance(&self, cid: String) {
        self.set(cid);
    }

    fn set(&self, cid: String) {
        *self.cid.lock().expect("chain head mutex poisoned") = cid;
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::new()
    }
}
