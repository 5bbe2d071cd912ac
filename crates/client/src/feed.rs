//! Rolling log and live counters derived from the push channel.
//!
//! [`LiveFeed`] is the stream-owned half of a scan view: a bounded log of
//! human-readable lines plus running totals from `batch_complete` events.
//! Nothing here is authoritative; the polled snapshot overrides it where
//! both report the same field.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use scanwatch_core::types::Timestamp;

use crate::messages::{LiveEvent, StreamMessage};

/// Default maximum number of log lines kept per scan.
pub const DEFAULT_LOG_CAPACITY: usize = 2000;

/// Marker appended when the server closes the push channel.
pub const DISCONNECTED_MARKER: &str = "disconnected";

// ---------------------------------------------------------------------------
// RollingLog
// ---------------------------------------------------------------------------

/// One line of the rolling log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonic position across the whole session, including evicted lines.
    pub seq: u64,
    pub at: Timestamp,
    pub text: String,
}

/// Append-only log with a fixed capacity; the oldest entries are evicted
/// first.
///
/// Entries are reference counted, so cloning the log never copies line
/// text.
#[derive(Debug, Clone)]
pub struct RollingLog {
    entries: VecDeque<Arc<LogEntry>>,
    capacity: usize,
    next_seq: u64,
}

impl RollingLog {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            next_seq: 0,
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Arc::new(LogEntry {
            seq: self.next_seq,
            at: Utc::now(),
            text: text.into(),
        }));
        self.next_seq += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total lines ever appended, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.next_seq
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().map(Arc::as_ref)
    }

    /// Entries with a sequence number at or after `seq`.
    pub fn since(&self, seq: u64) -> impl Iterator<Item = &LogEntry> {
        self.iter().filter(move |e| e.seq >= seq)
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back().map(Arc::as_ref)
    }
}

impl Default for RollingLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// LiveCounters
// ---------------------------------------------------------------------------

/// Running totals accumulated from push events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveCounters {
    pub hosts_up: u64,
    pub open_ports: u64,
    pub batches_started: u64,
    pub batches_completed: u64,
}

// ---------------------------------------------------------------------------
// LiveFeed
// ---------------------------------------------------------------------------

/// Everything the push channel has told us about one scan.
///
/// The log sits behind an `Arc` so views that differ only in other fields
/// share it.
#[derive(Debug, Clone, Default)]
pub struct LiveFeed {
    pub log: Arc<RollingLog>,
    pub counters: LiveCounters,
    /// A `connected` event has been received.
    pub connected: bool,
    /// A `scan_complete` event has been received.
    pub scan_complete_seen: bool,
}

impl LiveFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            log: Arc::new(RollingLog::new(capacity)),
            ..Default::default()
        }
    }

    /// Fold one decoded message into the log and counters.
    pub fn apply(&mut self, message: &StreamMessage) {
        match message {
            StreamMessage::Event(event) => {
                match event {
                    LiveEvent::Connected { .. } => self.connected = true,
                    LiveEvent::Line { .. } => {}
                    LiveEvent::BatchStart { .. } => self.counters.batches_started += 1,
                    LiveEvent::BatchComplete { summary, .. } => {
                        self.counters.batches_completed += 1;
                        self.counters.hosts_up += summary.hosts_up;
                        self.counters.open_ports += summary.open_ports;
                    }
                    LiveEvent::ScanComplete { .. } => self.scan_complete_seen = true,
                }
                self.log_mut().push(event.describe());
            }
            StreamMessage::Opaque(raw) => self.log_mut().push(raw.clone()),
        }
    }

    /// Append a connection diagnostic line.
    pub fn push_diagnostic(&mut self, text: impl AsRef<str>) {
        self.log_mut()
            .push(format!("websocket error: {}", text.as_ref()));
    }

    /// Append the marker for a graceful close.
    pub fn push_disconnected(&mut self) {
        self.log_mut().push(DISCONNECTED_MARKER);
    }

    fn log_mut(&mut self) -> &mut RollingLog {
        Arc::make_mut(&mut self.log)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
