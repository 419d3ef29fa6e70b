//! Raw event records carried through the shared-memory queue.
//!
//! [`RawEvent`] is a process-boundary ABI: the agent writes these bytes into
//! a memory-mapped ring and the reader, a separate process, copies them back
//! out. The layout is therefore `#[repr(C)]` with natural alignment and is
//! pinned by compile-time asserts; any change here is a wire-format change
//! for both binaries at once.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

use static_assertions::const_assert_eq;

/// Fixed capacity of the event text field, including the NUL terminator.
pub const TEXT_CAPACITY: usize = 256;

/// Source class of a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    /// A matched line appended to the system log.
    Syslog = 0,
    /// A USB device attach/detach reported by the kernel device bus.
    Usb = 1,
    /// A file deleted or moved out of a watched directory.
    FileDelete = 2,
}

impl EventKind {
    /// Name used for the `type` field of published log entries.
    ///
    /// File-deletion events publish as `SYSTEM`; so does any kind byte this
    /// build does not recognize, which keeps the reader forward-compatible
    /// with an agent that grows new sources.
    #[must_use]
    pub const fn label_for(kind: u8) -> &'static str {
        match kind {
            0 => "SYSLOG",
            1 => "USB",
            _ => "SYSTEM",
        }
    }
}

/// A fixed-layout event record, trivially copyable across the process
/// boundary.
///
/// `text` holds NUL-terminated UTF-8; messages longer than
/// `TEXT_CAPACITY - 1` bytes are truncated. A truncation that falls inside a
/// multi-byte codepoint is tolerated and decoded lossily on the reader side.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RawEvent {
    /// Source class, one of the [`EventKind`] discriminants.
    pub kind: u8,
    /// Monotone id assigned by the agent-wide [`EventCounter`] at emit time.
    pub event_id: u64,
    /// NUL-terminated UTF-8 message bytes.
    pub text: [u8; TEXT_CAPACITY],
}

// Both processes map the same file; the layout below is the contract.
const_assert_eq!(core::mem::offset_of!(RawEvent, kind), 0);
const_assert_eq!(core::mem::offset_of!(RawEvent, event_id), 8);
const_assert_eq!(core::mem::offset_of!(RawEvent, text), 16);
const_assert_eq!(core::mem::size_of::<RawEvent>(), 272);
const_assert_eq!(core::mem::align_of::<RawEvent>(), 8);

impl RawEvent {
    /// Builds an event, truncating `message` to `TEXT_CAPACITY - 1` bytes.
    #[must_use]
    pub fn new(kind: EventKind, event_id: u64, message: &str) -> Self {
        let mut text = [0u8; TEXT_CAPACITY];
        let bytes = message.as_bytes();
        let len = bytes.len().min(TEXT_CAPACITY - 1);
        text[..len].copy_from_slice(&bytes[..len]);
        Self {
            kind: kind as u8,
            event_id,
            text,
        }
    }

    /// An all-zero record (`SYSLOG`, id 0, empty text).
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            kind: 0,
            event_id: 0,
            text: [0u8; TEXT_CAPACITY],
        }
    }

    /// The message bytes up to the NUL terminator, decoded lossily.
    #[must_use]
    pub fn message(&self) -> Cow<'_, str> {
        let len = self
            .text
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TEXT_CAPACITY);
        String::from_utf8_lossy(&self.text[..len])
    }
}

/// Process-wide monotone event-id source.
///
/// `fetch_add` makes every assigned id unique and strictly increasing across
/// all emitting threads; Relaxed ordering is enough because the id is data,
/// not a synchronization edge.
#[derive(Debug, Default)]
pub struct EventCounter(AtomicU64);

impl EventCounter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Claims the next event id.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn truncates_long_message_to_255_bytes() {
        let long: String = "a".repeat(400);
        let ev = RawEvent::new(EventKind::Syslog, 1, &long);
        assert_eq!(ev.text[TEXT_CAPACITY - 1], 0);
        assert_eq!(ev.message().len(), TEXT_CAPACITY - 1);
        assert_eq!(ev.message(), long[..TEXT_CAPACITY - 1]);
    }

    #[test]
    fn short_message_round_trips() {
        let ev = RawEvent::new(EventKind::FileDelete, 42, "Deleted file: /etc/passwd");
        assert_eq!(ev.kind, 2);
        assert_eq!(ev.event_id, 42);
        assert_eq!(ev.message(), "Deleted file: /etc/passwd");
    }

    #[test]
    fn kind_labels() {
        assert_eq!(EventKind::label_for(0), "SYSLOG");
        assert_eq!(EventKind::label_for(1), "USB");
        assert_eq!(EventKind::label_for(2), "SYSTEM");
        assert_eq!(EventKind::label_for(200), "SYSTEM");
    }

    #[test]
    fn counter_ids_are_unique_across_threads() {
        let counter = Arc::new(EventCounter::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| counter.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.join().expect("counter thread panicked");
            // Per-thread draws are strictly increasing.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate event id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    proptest! {
        #[test]
        fn any_message_is_nul_terminated_and_bounded(message in ".{0,600}") {
            let ev = RawEvent::new(EventKind::Usb, 0, &message);
            prop_assert_eq!(ev.text[TEXT_CAPACITY - 1], 0);
            prop_assert!(ev.message().len() <= TEXT_CAPACITY - 1);
            // The stored text is always a byte-prefix of the input.
            prop_assert!(message.as_bytes().starts_with(ev.message().as_bytes())
                || message.len() > TEXT_CAPACITY - 1);
        }
    }
}
