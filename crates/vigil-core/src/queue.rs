//! Wait-free MPMC ring queue shared between the agent and reader processes.
//!
//! The queue is a plain `#[repr(C)]` value whose bytes live in a file-backed
//! mapping (see [`crate::shm`]): two padded atomic cursors followed by a
//! power-of-two array of cache-line-aligned slots. All synchronization is
//! per-slot; there is no lock and no kernel transition on the success path.
//!
//! Each slot cycles through `EMPTY -> WRITING -> FULL -> READING -> EMPTY`.
//! A producer claims a sequence number with a fetch-add on `tail`, then CASes
//! the addressed slot from `EMPTY` to `WRITING`; the CAS, not the cursor, is
//! what grants exclusive ownership of the payload. Publishing the payload is
//! a release store of `FULL`, paired with the consumer's acquire CAS of
//! `FULL -> READING`, so a dequeued record is never torn.
//!
//! Cursor order linearizes slot claims per side, but cross-slot global order
//! is not guaranteed: under contention consumers may observe events in an
//! interleaving that is not strictly `event_id`-ordered. Downstream code
//! sorts by `event_id` when it cares. The cursor difference is also not an
//! occupancy measure (cursors advance on failed claims too), so none is
//! exposed.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use static_assertions::const_assert_eq;

use crate::event::RawEvent;

/// Slot capacity of the queue both daemons compile against.
pub const QUEUE_CAPACITY: usize = 16384;

/// Claim attempts before `enqueue`/`dequeue` report failure.
///
/// Hitting the bound on enqueue means the ring is persistently full
/// (consumers stalled); callers treat that as backpressure and decide whether
/// to keep yielding. On dequeue it means transient emptiness.
pub const CLAIM_RETRY_LIMIT: usize = 10_000;

/// The queue type shared by the agent and reader binaries.
pub type EventQueue = RingQueue<QUEUE_CAPACITY>;

const CACHE_LINE: usize = 64;

/// Slot lifecycle states. Stored in a single byte so the two processes agree
/// on representation without negotiation.
mod state {
    pub const EMPTY: u8 = 0;
    pub const WRITING: u8 = 1;
    pub const FULL: u8 = 2;
    pub const READING: u8 = 3;
}

/// One ring cell: a state byte on its own cache line, payload on the next.
#[repr(C, align(64))]
struct Slot {
    state: AtomicU8,
    _pad: [u8; CACHE_LINE - 1],
    value: UnsafeCell<RawEvent>,
}

// The state machine grants exclusive payload access: exactly one thread holds
// a slot in WRITING and exactly one in READING, across both processes.
unsafe impl Sync for Slot {}

const_assert_eq!(core::mem::offset_of!(Slot, value), CACHE_LINE);
const_assert_eq!(core::mem::size_of::<Slot>(), 384);

/// Bounded MPMC ring queue with per-slot state machines.
///
/// `N` must be a power of two so `cursor & (N - 1)` addresses a slot. The
/// struct is position-independent (no pointers), so a file of exactly
/// `size_of::<RingQueue<N>>()` zero bytes is a valid, empty queue; both
/// processes must be compiled with the same `N`.
#[repr(C, align(64))]
pub struct RingQueue<const N: usize> {
    head: AtomicU64,
    _pad_head: [u8; CACHE_LINE - 8],
    tail: AtomicU64,
    _pad_tail: [u8; CACHE_LINE - 8],
    slots: [Slot; N],
}

const_assert_eq!(core::mem::offset_of!(RingQueue<8>, tail), CACHE_LINE);
const_assert_eq!(core::mem::offset_of!(RingQueue<8>, slots), 2 * CACHE_LINE);
const_assert_eq!(
    core::mem::size_of::<EventQueue>(),
    2 * CACHE_LINE + QUEUE_CAPACITY * 384
);

impl<const N: usize> RingQueue<N> {
    const CAPACITY_IS_POW2: () = assert!(N.is_power_of_two(), "queue capacity must be a power of two");

    /// Resets cursors and marks every slot `EMPTY`.
    ///
    /// Only the process that created the mapping calls this, once, before
    /// any enqueue; an attaching consumer must not re-initialize a live
    /// queue.
    pub fn init(&self) {
        let () = Self::CAPACITY_IS_POW2;
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        for slot in &self.slots {
            slot.state.store(state::EMPTY, Ordering::Relaxed);
        }
    }

    /// Allocates a zeroed, initialized queue on the heap.
    ///
    /// Useful for in-process queues and tests; the shared-memory path gets
    /// its zeroed storage from file truncation instead.
    #[must_use]
    pub fn new_boxed() -> Box<Self> {
        let () = Self::CAPACITY_IS_POW2;
        let layout = std::alloc::Layout::new::<Self>();
        // SAFETY: all-zero bytes are a valid RingQueue - cursors at zero and
        // every slot state EMPTY, which is exactly what init() produces.
        let queue = unsafe {
            let ptr = std::alloc::alloc_zeroed(layout).cast::<Self>();
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        };
        queue.init();
        queue
    }

    /// Enqueues a copy of `event`. Returns `false` once
    /// [`CLAIM_RETRY_LIMIT`] claim attempts have failed, which means the
    /// ring is persistently full.
    pub fn enqueue(&self, event: &RawEvent) -> bool {
        let () = Self::CAPACITY_IS_POW2;
        for _ in 0..CLAIM_RETRY_LIMIT {
            let seq = self.tail.fetch_add(1, Ordering::AcqRel);
            let slot = &self.slots[(seq & (N as u64 - 1)) as usize];

            if slot
                .state
                .compare_exchange(
                    state::EMPTY,
                    state::WRITING,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                // SAFETY: the EMPTY -> WRITING CAS grants this thread
                // exclusive ownership of the payload until the FULL store.
                unsafe { *slot.value.get() = *event };
                slot.state.store(state::FULL, Ordering::Release);
                return true;
            }
            std::thread::yield_now();
        }
        false
    }

    /// Dequeues one event, or `None` after [`CLAIM_RETRY_LIMIT`] attempts
    /// on a ring with no claimable slot (transient emptiness).
    pub fn dequeue(&self) -> Option<RawEvent> {
        let () = Self::CAPACITY_IS_POW2;
        for _ in 0..CLAIM_RETRY_LIMIT {
            let seq = self.head.fetch_add(1, Ordering::AcqRel);
            let slot = &self.slots[(seq & (N as u64 - 1)) as usize];

            if slot
                .state
                .compare_exchange(
                    state::FULL,
                    state::READING,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                // SAFETY: the FULL -> READING CAS grants exclusive read
                // ownership; the acquire pairs with the producer's release
                // store so the payload bytes are fully visible.
                let event = unsafe { *slot.value.get() };
                slot.state.store(state::EMPTY, Ordering::Release);
                return Some(event);
            }
            std::thread::yield_now();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::event::{EventKind, RawEvent};

    use super::*;

    fn event(id: u64, text: &str) -> RawEvent {
        RawEvent::new(EventKind::Syslog, id, text)
    }

    #[test]
    fn fills_exactly_to_capacity_then_fails() {
        let queue = RingQueue::<8>::new_boxed();

        let texts = ["A", "B", "C", "D", "E", "F", "G", "H"];
        for (id, text) in texts.iter().enumerate() {
            assert!(queue.enqueue(&event(id as u64, text)), "slot {id} rejected");
        }

        // Ninth enqueue exhausts the retry bound against a full ring.
        assert!(!queue.enqueue(&event(8, "I")));

        for (id, text) in texts.iter().enumerate() {
            let ev = queue.dequeue().expect("full ring must drain");
            assert_eq!(ev.event_id, id as u64);
            assert_eq!(ev.message(), *text);
        }
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let queue = RingQueue::<8>::new_boxed();
        assert!(queue.dequeue().is_none());
        // The failed dequeue advanced head; the queue still works.
        assert!(queue.enqueue(&event(1, "after miss")));
        let ev = queue.dequeue().expect("enqueued event must come back");
        assert_eq!(ev.event_id, 1);
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let queue = RingQueue::<64>::new_boxed();
        for id in 0..40 {
            assert!(queue.enqueue(&event(id, &format!("line {id}"))));
        }
        let mut last = None;
        while let Some(ev) = queue.dequeue() {
            if let Some(prev) = last {
                assert!(ev.event_id > prev);
            }
            last = Some(ev.event_id);
        }
        assert_eq!(last, Some(39));
    }

    #[test]
    fn payload_round_trips_byte_for_byte() {
        let queue = RingQueue::<4>::new_boxed();
        let sent = RawEvent::new(EventKind::FileDelete, 42, "Deleted file: /etc/passwd");
        assert!(queue.enqueue(&sent));
        let got = queue.dequeue().expect("event present");
        assert_eq!(got.kind, sent.kind);
        assert_eq!(got.event_id, sent.event_id);
        assert_eq!(got.text, sent.text);
    }

    #[test]
    fn concurrent_multiset_is_a_subset_of_enqueues() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 1000;
        const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

        let queue = RingQueue::<1024>::new_boxed();
        let received = std::sync::atomic::AtomicU64::new(0);

        let mut batches: Vec<Vec<u64>> = Vec::new();
        std::thread::scope(|scope| {
            for p in 0..PRODUCERS {
                let queue = &queue;
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let ev = event(p * PER_PRODUCER + i, &format!("p{p} event {i}"));
                        while !queue.enqueue(&ev) {
                            std::thread::yield_now();
                        }
                    }
                });
            }

            let mut consumers = Vec::new();
            for _ in 0..2 {
                let queue = &queue;
                let received = &received;
                consumers.push(scope.spawn(move || {
                    let mut got = Vec::new();
                    while received.load(Ordering::Relaxed) < TOTAL {
                        match queue.dequeue() {
                            Some(ev) => {
                                received.fetch_add(1, Ordering::Relaxed);
                                got.push(ev.event_id);
                            }
                            None => std::thread::sleep(std::time::Duration::from_millis(1)),
                        }
                    }
                    got
                }));
            }

            for handle in consumers {
                batches.push(handle.join().expect("consumer panicked"));
            }
        });

        let mut seen = HashSet::new();
        for batch in batches {
            for id in batch {
                assert!(id < TOTAL, "unknown event id {id}");
                assert!(seen.insert(id), "event id {id} dequeued twice");
            }
        }
        assert_eq!(seen.len() as u64, TOTAL, "events lost in transit");
    }
}
