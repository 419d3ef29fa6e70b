//! Log entries, batch payloads, and the size-or-time flush policy.
//!
//! Workers shape each dequeued [`RawEvent`](crate::event::RawEvent) into a
//! [`LogEntry`] and append its serialized form to a [`Spool`]. A flush is due
//! when the spool holds [`SIZE_THRESHOLD`] entries or the oldest entry has
//! waited [`AGE_THRESHOLD`], whichever comes first; a periodic flusher ticks
//! every [`FLUSH_TICK`] and the shutdown path forces a final flush.

use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventKind, RawEvent};

/// Entry count that forces a flush.
pub const SIZE_THRESHOLD: usize = 50;

/// Batch age that forces a flush.
pub const AGE_THRESHOLD: Duration = Duration::from_secs(4);

/// Period of the reader's flusher thread.
pub const FLUSH_TICK: Duration = Duration::from_secs(1);

/// Worker sleep after an empty dequeue.
pub const WORKER_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Current UTC time as ISO-8601 with millisecond precision and `Z` suffix.
#[must_use]
pub fn utc_timestamp_ms() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One published log record, shaped by the reader from a raw queue event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotone id assigned by the agent at emit time.
    pub event_id: u64,
    /// Source class name: `SYSLOG`, `USB`, or `SYSTEM`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The event message text.
    pub message: String,
    /// UTC dequeue timestamp, millisecond precision.
    pub timestamp: String,
}

impl LogEntry {
    /// Shapes a raw event, stamping the current UTC time.
    #[must_use]
    pub fn from_raw(event: &RawEvent) -> Self {
        Self {
            event_id: event.event_id,
            kind: EventKind::label_for(event.kind).to_string(),
            message: event.message().into_owned(),
            timestamp: utc_timestamp_ms(),
        }
    }
}

/// The pre-encryption batch payload.
///
/// `logs` carries each entry as an already-serialized JSON string, and
/// `prev_cid` is `null` only when the chain head string is empty - the
/// genesis head is the literal string `"null"`, not JSON null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayload {
    /// UTC flush timestamp.
    pub timestamp: String,
    /// Serialized [`LogEntry`] values, in append order.
    pub logs: Vec<String>,
    /// Chain head at flush time.
    pub prev_cid: Option<String>,
}

impl BatchPayload {
    /// Assembles a payload around the current chain head.
    #[must_use]
    pub fn new(logs: Vec<String>, prev_cid: &str) -> Self {
        Self {
            timestamp: utc_timestamp_ms(),
            logs,
            prev_cid: if prev_cid.is_empty() {
                None
            } else {
                Some(prev_cid.to_string())
            },
        }
    }

    /// Serializes with 2-space indentation, the published plaintext form.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Gives the entry strings back, for restoring a spool after a failed
    /// publish.
    #[must_use]
    pub fn into_logs(self) -> Vec<String> {
        self.logs
    }
}

/// The batch buffer plus its flush clock. Callers guard it with a mutex;
/// the spool itself only implements the policy.
#[derive(Debug)]
pub struct Spool {
    logs: Vec<String>,
    last_flush: Instant,
}

impl Spool {
    /// An empty spool whose flush clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: Vec::with_capacity(SIZE_THRESHOLD * 2),
            last_flush: Instant::now(),
        }
    }

    /// Appends one serialized entry.
    pub fn append(&mut self, entry_json: String) {
        self.logs.push(entry_json);
    }

    /// Number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    /// Whether the spool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Whether a flush should run now. An empty spool is never due.
    #[must_use]
    pub fn is_due(&self, force: bool) -> bool {
        if self.logs.is_empty() {
            return false;
        }
        force || self.logs.len() >= SIZE_THRESHOLD || self.last_flush.elapsed() >= AGE_THRESHOLD
    }

    /// Takes the buffered entries, leaving the spool empty.
    ///
    /// The flush clock is untouched: it advances in [`Self::mark_flushed`]
    /// only once the batch is actually published, so a failed publish is
    /// retried on the next flusher tick.
    #[must_use]
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.logs)
    }

    /// Puts staged entries back at the front after a failed publish.
    pub fn restore(&mut self, mut staged: Vec<String>) {
        staged.append(&mut self.logs);
        self.logs = staged;
    }

    /// Records a successful flush.
    pub fn mark_flushed(&mut self) {
        self.last_flush = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn age_backdate(&mut self, by: Duration) {
        self.last_flush -= by;
    }
}

impl Default for Spool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::event::{EventKind, RawEvent};

    use super::*;

    #[test]
    fn log_entry_json_shape() {
        let entry = LogEntry {
            event_id: 7,
            kind: "USB".to_string(),
            message: "USB device add".to_string(),
            timestamp: "2026-01-02T03:04:05.678Z".to_string(),
        };
        let json = serde_json::to_string(&entry).expect("serializes");
        assert_eq!(
            json,
            r#"{"event_id":7,"type":"USB","message":"USB device add","timestamp":"2026-01-02T03:04:05.678Z"}"#
        );
    }

    #[test]
    fn entry_from_raw_maps_kind_and_message() {
        let ev = RawEvent::new(EventKind::FileDelete, 9, "Deleted file: /tmp/x");
        let entry = LogEntry::from_raw(&ev);
        assert_eq!(entry.event_id, 9);
        assert_eq!(entry.kind, "SYSTEM");
        assert_eq!(entry.message, "Deleted file: /tmp/x");
        assert!(entry.timestamp.ends_with('Z'));
    }

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ts = utc_timestamp_ms();
        // e.g. 2026-08-02T10:11:12.345Z
        assert_eq!(ts.len(), 24);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn payload_null_prev_cid_only_for_empty_head() {
        let payload = BatchPayload::new(vec!["{}".to_string()], "");
        assert_eq!(payload.prev_cid, None);

        // The genesis head publishes as the string "null".
        let payload = BatchPayload::new(vec![], "null");
        assert_eq!(payload.prev_cid.as_deref(), Some("null"));

        let json = serde_json::to_string(&BatchPayload::new(vec![], "")).expect("serializes");
        assert!(json.contains("\"prev_cid\":null"));
    }

    #[test]
    fn spool_due_on_size() {
        let mut spool = Spool::new();
        assert!(!spool.is_due(false));
        for i in 0..SIZE_THRESHOLD {
            assert!(!spool.is_due(false), "due too early at {i}");
            spool.append(format!("{{\"event_id\":{i}}}"));
        }
        assert!(spool.is_due(false));
    }

    #[test]
    fn spool_due_on_age() {
        let mut spool = Spool::new();
        spool.append("{}".to_string());
        assert!(!spool.is_due(false));
        spool.age_backdate(AGE_THRESHOLD + Duration::from_millis(10));
        assert!(spool.is_due(false));
    }

    #[test]
    fn empty_spool_never_due_even_forced() {
        let spool = Spool::new();
        assert!(!spool.is_due(true));
    }

    #[test]
    fn restore_preserves_order_before_newer_entries() {
        let mut spool = Spool::new();
        spool.append("a".to_string());
        spool.append("b".to_string());
        let staged = spool.drain();
        assert!(spool.is_empty());
        spool.append("c".to_string());
        spool.restore(staged);
        assert_eq!(spool.drain(), ["a", "b", "c"]);
    }
}
