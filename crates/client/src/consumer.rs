//! Event stream consumer: one push-channel connection per scan.
//!
//! [`EventStreamConsumer`] owns the connection state machine
//! (`Closed -> Connecting -> Open -> Closed`). [`open`](EventStreamConsumer::open)
//! spawns a reader task, [`close`](EventStreamConsumer::close) tears it
//! down. Decoded messages are forwarded to the scan's
//! [`ViewStore`](crate::view::ViewStore) tagged with a session id, so
//! anything a torn-down session still manages to send is discarded by the
//! store.
//!
//! There is no automatic reconnect here. A transport error appends one
//! diagnostic line and ends the session; callers re-open if they want to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use scanwatch_core::types::DbId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::client::{ScanStreamClient, StreamError};
use crate::messages::decode_frame;
use crate::view::{ConnectionState, SessionId, StreamUpdate, ViewCommand, ViewHandle};

/// Default wait for the first message after connecting.
pub const DEFAULT_FIRST_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum silence once messages have started arriving.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Liveness limits for a push-channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Connecting plus receiving the first message must finish within this.
    pub first_message_timeout: Duration,
    /// Maximum gap between frames after the first message. `None` waits
    /// forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            first_message_timeout: DEFAULT_FIRST_MESSAGE_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// How a reading loop ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The owner tore the session down.
    Cancelled,
    /// The server closed the channel.
    Closed,
    Failed(StreamError),
}

// ---------------------------------------------------------------------------
// SessionSink
// ---------------------------------------------------------------------------

/// Writes one session's updates into a view.
#[derive(Debug, Clone)]
pub struct SessionSink {
    view: ViewHandle,
    session: SessionId,
}

impl SessionSink {
    /// Allocate a new session id and attach it to `view`.
    pub fn attach(view: ViewHandle) -> Self {
        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        view.send(ViewCommand::Attach { session });
        Self { view, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn send(&self, update: StreamUpdate) {
        self.view.send(ViewCommand::Stream {
            session: self.session,
            update,
        });
    }

    fn detach(&self) {
        self.view.send(ViewCommand::Detach {
            session: self.session,
        });
    }
}

// ---------------------------------------------------------------------------
// EventStreamConsumer
// ---------------------------------------------------------------------------

struct ActiveSession {
    sink: SessionSink,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one push-channel connection for a scan.
pub struct EventStreamConsumer {
    client: Arc<ScanStreamClient>,
    view: ViewHandle,
    config: StreamConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    active: Option<ActiveSession>,
}

impl EventStreamConsumer {
    pub fn new(client: Arc<ScanStreamClient>, view: ViewHandle, config: StreamConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        Self {
            client,
            view,
            config,
            state_tx: Arc::new(state_tx),
            state_rx,
            active: None,
        }
    }

    pub fn scan_id(&self) -> DbId {
        self.view.scan_id()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether a reader task is still running.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Open the channel unless a session is already running.
    ///
    /// Returns the id of the running session.
    pub fn open(&mut self) -> SessionId {
        if let Some(active) = &self.active {
            if !active.task.is_finished() {
                return active.sink.session();
            }
        }
        // A finished session leaves nothing to tear down except its slot.
        self.active = None;

        let sink = SessionSink::attach(self.view.clone());
        let cancel = CancellationToken::new();
        self.state_tx.send_replace(ConnectionState::Connecting);

        let scan_id = self.scan_id();
        let client = Arc::clone(&self.client);
        let config = self.config;
        let state_tx = Arc::clone(&self.state_tx);
        let task_sink = sink.clone();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            run_session(&client, scan_id, &task_sink, config, &state_tx, &task_cancel).await;
        });

        tracing::debug!(scan_id, session = sink.session(), "Stream session opened");

        let session = sink.session();
        self.active = Some(ActiveSession { sink, cancel, task });
        session
    }

    /// Tear the session down. Calling this on a closed consumer is a no-op.
    pub fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        active.task.abort();
        active.sink.detach();
        self.state_tx.send_replace(ConnectionState::Closed);
        tracing::debug!(
            scan_id = self.scan_id(),
            session = active.sink.session(),
            "Stream session closed"
        );
    }
}

impl Drop for EventStreamConsumer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect, then read until the channel ends or `cancel` fires.
async fn run_session(
    client: &ScanStreamClient,
    scan_id: DbId,
    sink: &SessionSink,
    config: StreamConfig,
    state: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
) {
    let deadline = Instant::now() + config.first_message_timeout;

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = tokio::time::timeout_at(deadline, client.connect(scan_id)) => result,
    };

    let conn = match connected {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            tracing::warn!(scan_id, error = %e, "Push channel connection failed");
            fail(sink, state, &e);
            return;
        }
        Err(_) => {
            let e = StreamError::FirstMessageTimeout(config.first_message_timeout);
            tracing::warn!(scan_id, error = %e, "Push channel connection timed out");
            fail(sink, state, &e);
            return;
        }
    };

    state.send_replace(ConnectionState::Open);
    sink.send(StreamUpdate::Opened);

    let mut ws_stream = conn.ws_stream;
    let end = read_stream(&mut ws_stream, sink, &config, deadline, cancel).await;

    match end {
        StreamEnd::Cancelled => return,
        StreamEnd::Closed => tracing::info!(scan_id, "Push channel closed"),
        StreamEnd::Failed(e) => tracing::warn!(scan_id, error = %e, "Push channel failed"),
    }
    state.send_replace(ConnectionState::Closed);
}

fn fail(sink: &SessionSink, state: &watch::Sender<ConnectionState>, error: &StreamError) {
    sink.send(StreamUpdate::Diagnostic(error.to_string()));
    sink.send(StreamUpdate::Closed);
    state.send_replace(ConnectionState::Closed);
}

/// Read frames from `stream` into `sink` in arrival order.
///
/// The first message must arrive within `config.first_message_timeout`;
/// afterwards each gap may last up to `config.idle_timeout`. A server
/// close appends one `disconnected` marker; an error or timeout appends
/// one diagnostic line. Either way reading stops.
pub async fn process_stream<S>(
    stream: &mut S,
    sink: &SessionSink,
    config: &StreamConfig,
    cancel: &CancellationToken,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let deadline = Instant::now() + config.first_message_timeout;
    read_stream(stream, sink, config, deadline, cancel).await
}

async fn read_stream<S>(
    stream: &mut S,
    sink: &SessionSink,
    config: &StreamConfig,
    first_deadline: Instant,
    cancel: &CancellationToken,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut received_any = false;

    loop {
        let deadline = if received_any {
            config.idle_timeout.map(|idle| Instant::now() + idle)
        } else {
            Some(first_deadline)
        };

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = next_frame(stream, deadline) => next,
        };

        let frame = match next {
            Some(frame) => frame,
            None => {
                let error = if received_any {
                    StreamError::IdleTimeout(config.idle_timeout.unwrap_or_default())
                } else {
                    StreamError::FirstMessageTimeout(config.first_message_timeout)
                };
                return end_with_error(sink, error);
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                received_any = true;
                if forward_frame(&text, sink, cancel).is_err() {
                    return StreamEnd::Cancelled;
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                received_any = true;
                let text = String::from_utf8_lossy(&bytes);
                if forward_frame(&text, sink, cancel).is_err() {
                    return StreamEnd::Cancelled;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "Push channel close frame");
                sink.send(StreamUpdate::Disconnected);
                return StreamEnd::Closed;
            }
            None => {
                sink.send(StreamUpdate::Disconnected);
                return StreamEnd::Closed;
            }
            Some(Err(e)) => {
                return end_with_error(sink, StreamError::Protocol(e.to_string()));
            }
        }
    }
}

/// `None` when the deadline passed, otherwise the stream's next item.
async fn next_frame<S>(stream: &mut S, deadline: Option<Instant>) -> Option<Option<S::Item>>
where
    S: Stream + Unpin,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, stream.next()).await.ok(),
        None => Some(stream.next().await),
    }
}

fn forward_frame(text: &str, sink: &SessionSink, cancel: &CancellationToken) -> Result<(), ()> {
    for message in decode_frame(text) {
        if cancel.is_cancelled() {
            return Err(());
        }
        sink.send(StreamUpdate::Message(message));
    }
    Ok(())
}

fn end_with_error(sink: &SessionSink, error: StreamError) -> StreamEnd {
    sink.send(StreamUpdate::Diagnostic(error.to_string()));
    sink.send(StreamUpdate::Closed);
    StreamEnd::Failed(error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
