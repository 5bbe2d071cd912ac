//! Per-scan view state and the task that owns it.
//!
//! A [`ScanView`] merges two producers: the polling synchronizer writes
//! authoritative [`ScanSnapshot`]s, and the event stream consumer writes
//! [`StreamUpdate`]s into the rolling log. Both send [`ViewCommand`]s to a
//! single [`ViewStore`] task which applies them one at a time and
//! publishes each result as a fresh `Arc<ScanView>` over a
//! [`tokio::sync::watch`] channel. Readers therefore only ever observe
//! whole views.
//!
//! Merge rule: any field the snapshot reports wins over what the stream
//! inferred. The log is stream-only.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scanwatch_core::models::{Host, Scan, ScanBatch};
use scanwatch_core::scan::{
    is_running_status, is_terminal_status, SCAN_STATUS_COMPLETED, SCAN_STATUS_FAILED,
    SCAN_STATUS_RUNNING,
};
use scanwatch_core::types::{DbId, Timestamp};
use tokio::sync::{mpsc, watch};

use crate::feed::{LiveCounters, LiveFeed, DEFAULT_LOG_CAPACITY};
use crate::messages::StreamMessage;

/// Identifies one push-channel connection attempt.
pub type SessionId = u64;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time REST listing of one scan, treated as authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSnapshot {
    pub scan: Scan,
    pub batches: Vec<ScanBatch>,
    pub hosts: Vec<Host>,
    pub fetched_at: Timestamp,
}

/// Batch counts by status, from the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchProgress {
    pub fn pending(&self) -> usize {
        self.total
            .saturating_sub(self.running + self.completed + self.failed)
    }
}

impl ScanSnapshot {
    pub fn new(scan: Scan, batches: Vec<ScanBatch>, hosts: Vec<Host>) -> Self {
        Self {
            scan,
            batches,
            hosts,
            fetched_at: Utc::now(),
        }
    }

    pub fn batch_progress(&self) -> BatchProgress {
        let mut progress = BatchProgress {
            total: self.batches.len(),
            ..Default::default()
        };
        for batch in &self.batches {
            let status = batch.status.as_str();
            if status.eq_ignore_ascii_case(SCAN_STATUS_COMPLETED) {
                progress.completed += 1;
            } else if status.eq_ignore_ascii_case(SCAN_STATUS_FAILED) {
                progress.failed += 1;
            } else if status.eq_ignore_ascii_case(SCAN_STATUS_RUNNING) {
                progress.running += 1;
            }
        }
        progress
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Where a rendered summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySource {
    Snapshot,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub hosts_up: u64,
    pub open_ports: u64,
    pub source: SummarySource,
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Push-channel connection state for a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

/// The most recent failed poll, kept until the next successful one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollFailure {
    pub message: String,
    pub at: Timestamp,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Updates produced by the event stream consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// The transport is connected.
    Opened,
    Message(StreamMessage),
    /// The connection failed; appended once as a diagnostic line.
    Diagnostic(String),
    /// The server closed the connection gracefully.
    Disconnected,
    /// The reader stopped after a diagnostic.
    Closed,
}

/// Everything the [`ViewStore`] task accepts.
#[derive(Debug, Clone)]
pub enum ViewCommand {
    /// A new stream session starts. Updates from any other session are
    /// ignored from now on.
    Attach { session: SessionId },
    Stream {
        session: SessionId,
        update: StreamUpdate,
    },
    /// The session was torn down by its owner.
    Detach { session: SessionId },
    Snapshot(Box<ScanSnapshot>),
    PollFailed(String),
}

// ---------------------------------------------------------------------------
// ScanView
// ---------------------------------------------------------------------------

/// The rendered aggregate for one scan.
#[derive(Debug, Clone)]
pub struct ScanView {
    pub scan_id: DbId,
    pub snapshot: Option<Arc<ScanSnapshot>>,
    pub feed: LiveFeed,
    pub stream_state: ConnectionState,
    pub poll_error: Option<PollFailure>,
    /// Incremented on every applied command.
    pub revision: u64,
    stream_session: Option<SessionId>,
}

impl ScanView {
    pub fn new(scan_id: DbId, log_capacity: usize) -> Self {
        Self {
            scan_id,
            snapshot: None,
            feed: LiveFeed::with_capacity(log_capacity),
            stream_state: ConnectionState::Closed,
            poll_error: None,
            revision: 0,
            stream_session: None,
        }
    }

    /// Rendered status. The snapshot's value wins; without a snapshot the
    /// stream's inference is used.
    pub fn status(&self) -> Option<&str> {
        if let Some(snapshot) = &self.snapshot {
            return Some(snapshot.scan.status.as_str());
        }
        if self.feed.scan_complete_seen {
            Some(SCAN_STATUS_COMPLETED)
        } else if self.feed.connected || self.stream_state == ConnectionState::Open {
            Some(SCAN_STATUS_RUNNING)
        } else {
            None
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(is_terminal_status)
    }

    pub fn is_running(&self) -> bool {
        self.status().is_some_and(is_running_status)
    }

    /// Hosts up and open ports. Computed from the host listing once a
    /// snapshot exists, from live `batch_complete` totals otherwise.
    pub fn summary(&self) -> ScanSummary {
        match &self.snapshot {
            Some(snapshot) => ScanSummary {
                hosts_up: snapshot.hosts.iter().filter(|h| h.is_up()).count() as u64,
                open_ports: snapshot
                    .hosts
                    .iter()
                    .map(|h| h.open_port_count() as u64)
                    .sum(),
                source: SummarySource::Snapshot,
            },
            None => ScanSummary {
                hosts_up: self.feed.counters.hosts_up,
                open_ports: self.feed.counters.open_ports,
                source: SummarySource::Live,
            },
        }
    }

    pub fn live_counters(&self) -> LiveCounters {
        self.feed.counters
    }

    /// Time since the last successful poll.
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.snapshot
            .as_ref()
            .and_then(|s| (Utc::now() - s.fetched_at).to_std().ok())
    }

    /// Apply one command. Returns whether the view changed.
    pub fn apply(&mut self, command: ViewCommand) -> bool {
        let changed = match command {
            ViewCommand::Attach { session } => {
                self.stream_session = Some(session);
                self.stream_state = ConnectionState::Connecting;
                true
            }
            ViewCommand::Stream { session, update } => {
                if self.stream_session != Some(session) {
                    tracing::trace!(
                        scan_id = self.scan_id,
                        session,
                        "Dropping update from inactive stream session"
                    );
                    return false;
                }
                self.apply_stream(update);
                true
            }
            ViewCommand::Detach { session } => {
                if self.stream_session == Some(session) {
                    self.stream_session = None;
                    self.stream_state = ConnectionState::Closed;
                    true
                } else {
                    false
                }
            }
            ViewCommand::Snapshot(snapshot) => {
                self.snapshot = Some(Arc::new(*snapshot));
                self.poll_error = None;
                true
            }
            ViewCommand::PollFailed(message) => {
                self.poll_error = Some(PollFailure {
                    message,
                    at: Utc::now(),
                });
                true
            }
        };
        if changed {
            self.revision += 1;
        }
        changed
    }

    fn apply_stream(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::Opened => self.stream_state = ConnectionState::Open,
            StreamUpdate::Message(message) => self.feed.apply(&message),
            StreamUpdate::Diagnostic(text) => self.feed.push_diagnostic(text),
            StreamUpdate::Disconnected => {
                self.feed.push_disconnected();
                self.stream_state = ConnectionState::Closed;
            }
            StreamUpdate::Closed => self.stream_state = ConnectionState::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// ViewStore
// ---------------------------------------------------------------------------

/// The task that owns a [`ScanView`].
pub struct ViewStore;

impl ViewStore {
    /// Spawn the owning task and return a handle to it.
    ///
    /// The task exits once every [`ViewHandle`] clone has been dropped.
    pub fn spawn(scan_id: DbId, log_capacity: usize) -> ViewHandle {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<ViewCommand>();
        let (view_tx, view_rx) = watch::channel(Arc::new(ScanView::new(scan_id, log_capacity)));

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                view_tx.send_if_modified(|view| Arc::make_mut(view).apply(command));
            }
            tracing::debug!(scan_id, "View store exited");
        });

        ViewHandle {
            scan_id,
            commands: command_tx,
            view: view_rx,
        }
    }

    pub fn spawn_default(scan_id: DbId) -> ViewHandle {
        Self::spawn(scan_id, DEFAULT_LOG_CAPACITY)
    }
}

/// Cloneable handle for sending commands to, and reading from, a
/// [`ViewStore`] task.
#[derive(Debug, Clone)]
pub struct ViewHandle {
    scan_id: DbId,
    commands: mpsc::UnboundedSender<ViewCommand>,
    view: watch::Receiver<Arc<ScanView>>,
}

impl ViewHandle {
    pub fn scan_id(&self) -> DbId {
        self.scan_id
    }

    /// Queue a command. Returns `false` if the store has exited.
    pub fn send(&self, command: ViewCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Whether the store task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// The latest published view.
    pub fn current(&self) -> Arc<ScanView> {
        self.view.borrow().clone()
    }

    /// A receiver notified on every published view.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ScanView>> {
        self.view.clone()
    }

    /// Wait until `predicate` holds for the published view.
    ///
    /// Returns `None` if the store exits first.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Option<Arc<ScanView>>
    where
        F: FnMut(&ScanView) -> bool,
    {
        let mut rx = self.view.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if predicate(&current) {
                    return Some(current.clone());
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
