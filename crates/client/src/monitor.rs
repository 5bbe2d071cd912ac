//! Monitoring pipelines.
//!
//! [`ScanMonitor`] wires one scan's [`ViewStore`], [`PollingSynchronizer`]
//! and [`EventStreamConsumer`] together. The push channel is opened when
//! the scan enters a running status and closed when it leaves it.
//!
//! [`ProjectMonitor`] polls a scan list, either one project's or every
//! project's, and keeps one [`ScanMonitor`] per listed scan. Changes to the list are broadcast as
//! [`MonitorEvent`]s; call [`ProjectMonitor::subscribe`] to receive them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scanwatch_core::scan::is_running_status;
use scanwatch_core::types::DbId;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;
use crate::backend::ScanBackend;
use crate::client::ScanStreamClient;
use crate::config::MonitorConfig;
use crate::consumer::EventStreamConsumer;
use crate::events::MonitorEvent;
use crate::poller::PollingSynchronizer;
use crate::view::{ScanView, ViewHandle, ViewStore};

/// Broadcast channel capacity for monitor events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-task wait during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ScanMonitor
// ---------------------------------------------------------------------------

/// The monitoring pipeline for a single scan.
///
/// Dropping the monitor cancels its tasks without waiting for them; use
/// [`ScanMonitor::shutdown`] to wait for a clean exit.
pub struct ScanMonitor {
    scan_id: DbId,
    view: ViewHandle,
    cancel: CancellationToken,
    poller_task: Option<JoinHandle<()>>,
    stream_task: Option<JoinHandle<()>>,
}

impl ScanMonitor {
    /// Spawn the view store, the poller and the stream supervisor.
    ///
    /// `initially_running` opens the push channel before the first
    /// snapshot arrives, e.g. right after a successful start.
    pub fn start(
        backend: Arc<dyn ScanBackend>,
        stream_client: Arc<ScanStreamClient>,
        config: &MonitorConfig,
        scan_id: DbId,
        project_id: Option<DbId>,
        initially_running: bool,
    ) -> Self {
        Self::start_with_cancel(
            backend,
            stream_client,
            config,
            scan_id,
            project_id,
            initially_running,
            CancellationToken::new(),
        )
    }

    fn start_with_cancel(
        backend: Arc<dyn ScanBackend>,
        stream_client: Arc<ScanStreamClient>,
        config: &MonitorConfig,
        scan_id: DbId,
        project_id: Option<DbId>,
        initially_running: bool,
        cancel: CancellationToken,
    ) -> Self {
        let view = ViewStore::spawn(scan_id, config.log_capacity);

        let poller = PollingSynchronizer::new(backend, scan_id, project_id, config.poll);
        let poller_task = tokio::spawn(poller.run(view.clone(), cancel.clone()));

        let consumer = EventStreamConsumer::new(stream_client, view.clone(), config.stream);
        let stream_task = tokio::spawn(supervise_stream(
            consumer,
            view.clone(),
            initially_running,
            cancel.clone(),
        ));

        tracing::info!(scan_id, ?project_id, initially_running, "Scan monitor started");

        Self {
            scan_id,
            view,
            cancel,
            poller_task: Some(poller_task),
            stream_task: Some(stream_task),
        }
    }

    pub fn scan_id(&self) -> DbId {
        self.scan_id
    }

    pub fn view(&self) -> &ViewHandle {
        &self.view
    }

    pub fn current(&self) -> Arc<ScanView> {
        self.view.current()
    }

    /// Stop polling and close the push channel.
    ///
    /// Waits up to 5 seconds per task for a clean exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in [self.poller_task.take(), self.stream_task.take()]
            .into_iter()
            .flatten()
        {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await;
        }
        tracing::debug!(scan_id = self.scan_id, "Scan monitor shut down");
    }
}

impl Drop for ScanMonitor {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(scan_id = self.scan_id, "Scan monitor dropped, cancelling tasks");
            self.cancel.cancel();
        }
    }
}

/// Whether the push channel should be open for `view`.
///
/// A snapshot decides once one exists; before that the caller's hint does.
fn wants_stream(view: &ScanView, initially_running: bool) -> bool {
    match &view.snapshot {
        Some(snapshot) => is_running_status(&snapshot.scan.status),
        None => initially_running,
    }
}

/// Open or close the consumer on transitions into and out of running.
///
/// Only edges act: a session that ended on its own is not reopened while
/// the status stays running.
async fn supervise_stream(
    mut consumer: EventStreamConsumer,
    view: ViewHandle,
    initially_running: bool,
    cancel: CancellationToken,
) {
    let scan_id = view.scan_id();
    let mut rx = view.subscribe();
    let mut streaming = false;

    loop {
        let wants = wants_stream(&rx.borrow_and_update(), initially_running);
        if wants != streaming {
            if wants {
                let session = consumer.open();
                tracing::debug!(scan_id, session, "Scan running, push channel opened");
            } else {
                consumer.close();
                tracing::debug!(scan_id, "Scan no longer running, push channel closed");
            }
            streaming = wants;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    consumer.close();
}

// ---------------------------------------------------------------------------
// ProjectMonitor
// ---------------------------------------------------------------------------

/// Which scan listing a [`ProjectMonitor`] follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingScope {
    /// `GET /projects/{id}/scans`
    Project(DbId),
    /// `GET /scans`, every project.
    AllProjects,
}

/// Keeps a [`ScanMonitor`] for every scan in a listing.
pub struct ProjectMonitor {
    scope: ListingScope,
    backend: Arc<dyn ScanBackend>,
    stream_client: Arc<ScanStreamClient>,
    config: MonitorConfig,
    /// Active monitors and their last listed status, indexed by scan id.
    scans: RwLock<HashMap<DbId, (ScanMonitor, String)>>,
    event_tx: broadcast::Sender<MonitorEvent>,
    /// Master cancellation token; scan monitors use child tokens.
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProjectMonitor {
    /// Create a monitor for one project without starting the listing loop.
    pub fn new(
        backend: Arc<dyn ScanBackend>,
        stream_client: Arc<ScanStreamClient>,
        config: MonitorConfig,
        project_id: DbId,
    ) -> Arc<Self> {
        Self::with_scope(
            backend,
            stream_client,
            config,
            ListingScope::Project(project_id),
        )
    }

    /// Create a monitor over every project's scans.
    pub fn all_projects(
        backend: Arc<dyn ScanBackend>,
        stream_client: Arc<ScanStreamClient>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        Self::with_scope(backend, stream_client, config, ListingScope::AllProjects)
    }

    pub fn with_scope(
        backend: Arc<dyn ScanBackend>,
        stream_client: Arc<ScanStreamClient>,
        config: MonitorConfig,
        scope: ListingScope,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            scope,
            backend,
            stream_client,
            config,
            scans: RwLock::new(HashMap::new()),
            event_tx,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Spawn the listing loop. Subscribe first to see the initial
    /// `ScanAdded` events. Does nothing if the loop is already running.
    pub async fn start_listing(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_none() {
            *task = Some(tokio::spawn(Arc::clone(self).run_listing_loop()));
        }
    }

    pub fn scope(&self) -> ListingScope {
        self.scope
    }

    /// Subscribe to scan-list changes.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Monitored scan ids in ascending order.
    pub async fn scan_ids(&self) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self.scans.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn view(&self, scan_id: DbId) -> Option<ViewHandle> {
        self.scans
            .read()
            .await
            .get(&scan_id)
            .map(|(monitor, _)| monitor.view().clone())
    }

    /// Views of every monitored scan, newest scan first.
    pub async fn views(&self) -> Vec<ViewHandle> {
        let scans = self.scans.read().await;
        let mut views: Vec<ViewHandle> = scans.values().map(|(m, _)| m.view().clone()).collect();
        views.sort_unstable_by_key(|v| std::cmp::Reverse(v.scan_id()));
        views
    }

    /// Fetch the scan list once and reconcile the monitors with it.
    ///
    /// Returns the number of listed scans.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let listing = match self.scope {
            ListingScope::Project(project_id) => self.backend.list_project_scans(project_id).await,
            ListingScope::AllProjects => self.backend.list_all_scans().await,
        };
        let listed = match listing {
            Ok(scans) => scans,
            Err(e) => {
                tracing::warn!(scope = ?self.scope, error = %e, "Failed to list scans");
                let _ = self.event_tx.send(MonitorEvent::ListingFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut events = Vec::new();
        let mut removed = Vec::new();
        {
            let mut scans = self.scans.write().await;

            for scan in &listed {
                match scans.get_mut(&scan.id) {
                    Some((_, status)) if *status != scan.status => {
                        events.push(MonitorEvent::StatusChanged {
                            scan_id: scan.id,
                            previous: std::mem::replace(status, scan.status.clone()),
                            status: scan.status.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        let monitor = ScanMonitor::start_with_cancel(
                            Arc::clone(&self.backend),
                            Arc::clone(&self.stream_client),
                            &self.config,
                            scan.id,
                            Some(scan.project_id),
                            is_running_status(&scan.status),
                            self.cancel.child_token(),
                        );
                        scans.insert(scan.id, (monitor, scan.status.clone()));
                        events.push(MonitorEvent::ScanAdded {
                            scan_id: scan.id,
                            status: scan.status.clone(),
                        });
                    }
                }
            }

            let gone: Vec<DbId> = scans
                .keys()
                .filter(|id| !listed.iter().any(|s| s.id == **id))
                .copied()
                .collect();
            for scan_id in gone {
                if let Some((monitor, _)) = scans.remove(&scan_id) {
                    removed.push(monitor);
                    events.push(MonitorEvent::ScanRemoved { scan_id });
                }
            }
        }

        for monitor in removed {
            monitor.shutdown().await;
        }
        for event in events {
            let _ = self.event_tx.send(event);
        }

        tracing::debug!(scope = ?self.scope, scans = listed.len(), "Scan listing refreshed");
        Ok(listed.len())
    }

    /// Gracefully shut down the listing loop and every scan monitor.
    pub async fn shutdown(&self) {
        tracing::info!(scope = ?self.scope, "Shutting down project monitor");
        self.cancel.cancel();

        if let Some(task) = self.task.lock().await.take() {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await;
        }

        let mut scans = self.scans.write().await;
        for (scan_id, (monitor, _)) in scans.drain() {
            tracing::debug!(scan_id, "Stopping scan monitor");
            monitor.shutdown().await;
        }

        tracing::info!(scope = ?self.scope, "Project monitor shut down");
    }

    async fn run_listing_loop(self: Arc<Self>) {
        tracing::info!(scope = ?self.scope, "Listing loop started");
        loop {
            // Errors are already logged and broadcast.
            let _ = self.refresh().await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll.interval) => {}
            }
        }
        tracing::info!(scope = ?self.scope, "Listing loop exited");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
