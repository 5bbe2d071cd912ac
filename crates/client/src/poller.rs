//! Polling state synchronizer.
//!
//! Periodically re-fetches the scan row, its batches and its hosts, and
//! hands the result to the scan's view store as an authoritative
//! [`ScanSnapshot`]. A failed poll leaves the previous snapshot in place
//! and only raises a transient error on the view. Polling stops (or slows
//! down, see [`TerminalPolicy`]) once the scan reports a terminal status.

use std::sync::Arc;
use std::time::Duration;

use scanwatch_core::models::Scan;
use scanwatch_core::scan::is_terminal_status;
use scanwatch_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::api::ApiError;
use crate::backend::ScanBackend;
use crate::view::{ScanSnapshot, ViewCommand, ViewHandle};

/// Default interval between polls of an active scan.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What to do once the latest snapshot reports a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalPolicy {
    /// Stop polling.
    Stop,
    /// Keep polling at this (longer) interval.
    Degrade(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub terminal: TerminalPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            terminal: TerminalPolicy::Stop,
        }
    }
}

/// A snapshot refresh failed. Never fatal to the view.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Failed to fetch {resource}: {source}")]
    Fetch {
        resource: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Scan {0} not present in listing")]
    ScanMissing(DbId),
}

impl PollError {
    fn fetch(resource: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| PollError::Fetch { resource, source }
    }
}

/// Delay before the next poll, or `None` to stop.
pub fn next_interval(config: &PollConfig, last_status: Option<&str>) -> Option<Duration> {
    match last_status {
        Some(status) if is_terminal_status(status) => match config.terminal {
            TerminalPolicy::Stop => None,
            TerminalPolicy::Degrade(interval) => Some(interval),
        },
        _ => Some(config.interval),
    }
}

/// Polls the snapshot of one scan.
pub struct PollingSynchronizer {
    backend: Arc<dyn ScanBackend>,
    scan_id: DbId,
    /// When known, the scan row is looked up in the project's listing
    /// instead of the global one.
    project_id: Option<DbId>,
    config: PollConfig,
}

impl PollingSynchronizer {
    pub fn new(
        backend: Arc<dyn ScanBackend>,
        scan_id: DbId,
        project_id: Option<DbId>,
        config: PollConfig,
    ) -> Self {
        Self {
            backend,
            scan_id,
            project_id,
            config,
        }
    }

    pub fn scan_id(&self) -> DbId {
        self.scan_id
    }

    /// Fetch scan, batches and hosts concurrently.
    pub async fn fetch_snapshot(&self) -> Result<ScanSnapshot, PollError> {
        let (scan, batches, hosts) = tokio::try_join!(
            self.fetch_scan(),
            async {
                self.backend
                    .list_scan_batches(self.scan_id)
                    .await
                    .map_err(PollError::fetch("batches"))
            },
            async {
                self.backend
                    .list_scan_hosts(self.scan_id)
                    .await
                    .map_err(PollError::fetch("hosts"))
            },
        )?;

        Ok(ScanSnapshot::new(scan, batches, hosts))
    }

    /// Poll once and publish the outcome to `view`.
    ///
    /// Returns the snapshot's scan status on success.
    pub async fn poll_once(&self, view: &ViewHandle) -> Result<String, PollError> {
        match self.fetch_snapshot().await {
            Ok(snapshot) => {
                let status = snapshot.scan.status.clone();
                tracing::debug!(
                    scan_id = self.scan_id,
                    status = %status,
                    batches = snapshot.batches.len(),
                    hosts = snapshot.hosts.len(),
                    "Snapshot refreshed",
                );
                view.send(ViewCommand::Snapshot(Box::new(snapshot)));
                Ok(status)
            }
            Err(e) => {
                tracing::warn!(scan_id = self.scan_id, error = %e, "Snapshot refresh failed");
                view.send(ViewCommand::PollFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Poll until the scan is terminal (per [`TerminalPolicy`]), the view
    /// store exits, or `cancel` fires.
    pub async fn run(self, view: ViewHandle, cancel: CancellationToken) {
        tracing::info!(
            scan_id = self.scan_id,
            interval_secs = self.config.interval.as_secs(),
            "Snapshot polling started"
        );

        let mut last_status: Option<String> = None;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.poll_once(&view) => outcome,
            };
            if let Ok(status) = outcome {
                last_status = Some(status);
            }

            if view.is_closed() {
                break;
            }

            let Some(delay) = next_interval(&self.config, last_status.as_deref()) else {
                tracing::info!(
                    scan_id = self.scan_id,
                    status = last_status.as_deref().unwrap_or_default(),
                    "Scan is terminal, polling stopped"
                );
                break;
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!(scan_id = self.scan_id, "Snapshot polling exited");
    }

    async fn fetch_scan(&self) -> Result<Scan, PollError> {
        let scans = match self.project_id {
            Some(project_id) => self
                .backend
                .list_project_scans(project_id)
                .await
                .map_err(PollError::fetch("project scans"))?,
            None => self
                .backend
                .list_all_scans()
                .await
                .map_err(PollError::fetch("scans"))?,
        };

        scans
            .into_iter()
            .find(|scan| scan.id == self.scan_id)
            .ok_or(PollError::ScanMissing(self.scan_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
