//! End-to-end pipeline test: events cross a real file-backed mapping, get
//! shaped and batched by concurrent workers, and come out the far side as a
//! decryptable, backward-linked chain of envelopes.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use vigil_core::batch::BatchPayload;
use vigil_core::cas::{Cas, CasError, KeyRef};
use vigil_core::chain::ChainHead;
use vigil_core::crypto::{open_envelope, Envelope, HybridSealer};
use vigil_core::event::{EventCounter, EventKind, RawEvent};
use vigil_core::publish::{Pipeline, Publisher};
use vigil_core::queue::RingQueue;
use vigil_core::shm::SharedRegion;
use vigil_core::LogEntry;

type TestQueue = RingQueue<64>;

/// In-memory store handing out deterministic CIDs.
struct MemoryCas {
    puts: Mutex<Vec<Vec<u8>>>,
}

/// Thin local newtype so `Cas` (foreign trait) can be implemented for
/// `Arc<MemoryCas>` (foreign type) without violating orphan rules in this
/// integration test crate.
struct MemoryCasHandle(Arc<MemoryCas>);

impl Cas for MemoryCasHandle {
    fn put(&self, file: &Path) -> Result<String, CasError> {
        let bytes = std::fs::read(file).expect("envelope file readable");
        let mut puts = self.0.puts.lock().expect("cas lock");
        puts.push(bytes);
        Ok(format!("QmE2e{}", puts.len()))
    }

    fn name_publish(&self, _key: &str, _cid: &str) -> Result<(), CasError> {
        Ok(())
    }

    fn key_list(&self) -> Result<Vec<KeyRef>, CasError> {
        Ok(Vec::new())
    }

    fn name_resolve(&self, _name_id: &str) -> Result<Option<String>, CasError> {
        Ok(None)
    }
}

fn decrypt(envelope_bytes: &[u8], private: &RsaPrivateKey) -> BatchPayload {
    let envelope: Envelope = serde_json::from_slice(envelope_bytes).expect("envelope JSON");
    let plaintext = open_envelope(&envelope, private).expect("envelope opens");
    serde_json::from_slice(&plaintext).expect("payload JSON")
}

#[test]
fn events_flow_from_mapping_to_chained_envelopes() {
    const EVENTS: usize = 10;

    let dir = tempfile::tempdir().expect("tempdir");
    let queue_path = dir.path().join("event_queue_shm");

    // Agent side: create the mapping and initialize the queue.
    let producer_region: SharedRegion<TestQueue> =
        SharedRegion::create(&queue_path).expect("create mapping");
    producer_region.get().init();

    // Reader side: attach to the same file through a second mapping.
    let consumer_region: SharedRegion<TestQueue> =
        SharedRegion::attach(&queue_path).expect("attach mapping");

    let private = RsaPrivateKey::new(&mut OsRng, 2048).expect("test key");
    let cas = Arc::new(MemoryCas {
        puts: Mutex::new(Vec::new()),
    });
    let publisher = Publisher::new(
        HybridSealer::new(RsaPublicKey::from(&private)),
        Box::new(MemoryCasHandle(Arc::clone(&cas))),
        "log-agent",
        dir.path().join("log_batch.json.enc"),
    );
    let pipeline = Pipeline::new(publisher, ChainHead::new());

    let counter = EventCounter::new();
    let drained = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        let queue = producer_region.get();
        let counter = &counter;
        scope.spawn(move || {
            for i in 0..EVENTS {
                let event = RawEvent::new(
                    EventKind::Syslog,
                    counter.next(),
                    &format!("failed login attempt {i}"),
                );
                while !queue.enqueue(&event) {
                    std::thread::yield_now();
                }
            }
        });

        for _ in 0..2 {
            let queue = consumer_region.get();
            let pipeline = &pipeline;
            let drained = &drained;
            scope.spawn(move || {
                while drained.load(Ordering::Relaxed) < EVENTS {
                    match queue.dequeue() {
                        Some(event) => {
                            let entry = LogEntry::from_raw(&event);
                            pipeline.ingest(&entry).expect("ingest");
                            drained.fetch_add(1, Ordering::Relaxed);
                        }
                        None => std::thread::sleep(std::time::Duration::from_millis(1)),
                    }
                }
            });
        }
    });

    // First batch: everything drained so far, against a genesis head.
    let cid1 = pipeline
        .flush_if_due(true)
        .expect("flush")
        .expect("batch published");
    assert_eq!(cid1, "QmE2e1");

    // Two more batches extend the chain.
    for round in 0..2u64 {
        let event = RawEvent::new(EventKind::Usb, counter.next(), &format!("USB device add {round}"));
        pipeline
            .ingest(&LogEntry::from_raw(&event))
            .expect("ingest");
        pipeline.flush_if_due(true).expect("flush").expect("published");
    }

    let puts = cas.puts.lock().expect("cas lock");
    assert_eq!(puts.len(), 3);

    let p1 = decrypt(&puts[0], &private);
    let p2 = decrypt(&puts[1], &private);
    let p3 = decrypt(&puts[2], &private);

    // Chain continuity, newest to genesis.
    assert_eq!(p1.prev_cid.as_deref(), Some("null"));
    assert_eq!(p2.prev_cid.as_deref(), Some("QmE2e1"));
    assert_eq!(p3.prev_cid.as_deref(), Some("QmE2e2"));

    // The first batch carries every emitted event exactly once, and every
    // dequeued payload matches what the producer wrote.
    assert_eq!(p1.logs.len(), EVENTS);
    let mut ids: Vec<u64> = p1
        .logs
        .iter()
        .map(|log| {
            let entry: LogEntry = serde_json::from_str(log).expect("entry JSON");
            assert_eq!(entry.kind, "SYSLOG");
            assert!(entry
                .message
                .starts_with("failed login attempt "));
            entry.event_id
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..EVENTS as u64).collect::<Vec<_>>());
}
