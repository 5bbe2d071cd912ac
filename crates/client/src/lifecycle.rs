//! Scan lifecycle controller.
//!
//! Tracks what the client knows about one scan it started or adopted:
//!
//! ```text
//! Idle -> Starting -> Running -> { Completed | Stopped | Failed }
//! ```
//!
//! `Starting -> Running` happens only on a successful start response with
//! a scan id. `Running -> Stopped` happens only when the stop request
//! succeeds. `Completed` and `Failed` are only ever entered from a status
//! the backend reported through [`ScanLifecycle::observe_status`].

use std::fmt;
use std::sync::Arc;

use scanwatch_core::models::StartScanRequest;
use scanwatch_core::scan::{
    is_running_status, validate_flags, validate_runner, DEFAULT_CONCURRENCY,
    SCAN_STATUS_COMPLETED, SCAN_STATUS_FAILED, SCAN_STATUS_STOPPED,
};
use scanwatch_core::targets::{clamp_chunk_size, flatten_batches, Batch};
use scanwatch_core::types::DbId;

use crate::api::ApiError;
use crate::backend::ScanBackend;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Idle,
    /// The start request is in flight; no id yet.
    Starting,
    Running { scan_id: DbId },
    Completed { scan_id: DbId },
    Stopped { scan_id: DbId },
    Failed { scan_id: DbId },
}

impl LifecycleState {
    pub fn scan_id(&self) -> Option<DbId> {
        match *self {
            LifecycleState::Idle | LifecycleState::Starting => None,
            LifecycleState::Running { scan_id }
            | LifecycleState::Completed { scan_id }
            | LifecycleState::Stopped { scan_id }
            | LifecycleState::Failed { scan_id } => Some(scan_id),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed { .. }
                | LifecycleState::Stopped { .. }
                | LifecycleState::Failed { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running { .. } => "running",
            LifecycleState::Completed { .. } => "completed",
            LifecycleState::Stopped { .. } => "stopped",
            LifecycleState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scan_id() {
            Some(scan_id) => write!(f, "{} (scan {scan_id})", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A start or stop action failed. The action can be retried.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Refused locally; no request was sent.
    #[error("Cannot {operation} scan: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    /// The backend answered with a non-2xx status.
    #[error("{operation} failed ({status}): {body}")]
    Backend {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The request never got a response.
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("Cannot {operation} scan while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

impl LifecycleError {
    fn from_api(operation: &'static str, error: ApiError) -> Self {
        match error {
            ApiError::Status { status, body } => LifecycleError::Backend {
                operation,
                status,
                body,
            },
            other => LifecycleError::Transport {
                operation,
                message: other.to_string(),
            },
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            LifecycleError::Rejected { operation, .. }
            | LifecycleError::Backend { operation, .. }
            | LifecycleError::Transport { operation, .. }
            | LifecycleError::InvalidState { operation, .. } => *operation,
        }
    }

    /// Raw HTTP status, when the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            LifecycleError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Everything needed to start a scan over pre-computed batches.
#[derive(Debug, Clone)]
pub struct ScanSubmission {
    pub project_id: DbId,
    pub nmap_flags: Vec<String>,
    pub batches: Vec<Batch>,
    pub chunk_size: i64,
    pub concurrency: u32,
    pub runner: Option<String>,
}

impl ScanSubmission {
    pub fn new(project_id: DbId, nmap_flags: Vec<String>, batches: Vec<Batch>, chunk_size: i64) -> Self {
        Self {
            project_id,
            nmap_flags,
            batches,
            chunk_size,
            concurrency: DEFAULT_CONCURRENCY,
            runner: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = Some(runner.into());
        self
    }

    pub fn target_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    fn validate(&self) -> Result<(), LifecycleError> {
        let reject = |reason: String| LifecycleError::Rejected {
            operation: "start",
            reason,
        };

        if self.target_count() == 0 {
            return Err(reject("no targets".to_string()));
        }
        validate_flags(&self.nmap_flags).map_err(|e| reject(e.to_string()))?;
        if let Some(runner) = &self.runner {
            validate_runner(runner).map_err(|e| reject(e.to_string()))?;
        }
        if self.concurrency == 0 {
            return Err(reject("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The wire request: flattened targets plus the scalar chunk size.
    pub fn to_request(&self) -> StartScanRequest {
        StartScanRequest {
            project_id: self.project_id,
            nmap_flags: self.nmap_flags.clone(),
            targets: flatten_batches(&self.batches),
            chunk_size: clamp_chunk_size(self.chunk_size) as i64,
            concurrency: self.concurrency,
            runner: self.runner.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct ScanLifecycle {
    backend: Arc<dyn ScanBackend>,
    state: LifecycleState,
}

impl ScanLifecycle {
    pub fn new(backend: Arc<dyn ScanBackend>) -> Self {
        Self {
            backend,
            state: LifecycleState::Idle,
        }
    }

    /// Take over an existing scan, classifying its last known status.
    pub fn adopt(backend: Arc<dyn ScanBackend>, scan_id: DbId, status: &str) -> Self {
        let mut lifecycle = Self {
            backend,
            state: LifecycleState::Running { scan_id },
        };
        lifecycle.observe_status(status);
        lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn scan_id(&self) -> Option<DbId> {
        self.state.scan_id()
    }

    /// Submit a scan. Allowed from `Idle` or after a previous scan ended.
    ///
    /// Validation failures are returned before any request is sent. A
    /// failed request puts the controller back to `Idle`, and so does
    /// dropping the returned future before the backend answers.
    pub async fn start(&mut self, submission: &ScanSubmission) -> Result<DbId, LifecycleError> {
        if !(self.state == LifecycleState::Idle || self.state.is_terminal()) {
            return Err(LifecycleError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        submission.validate()?;

        let request = submission.to_request();
        let attempt = StartAttempt::begin(&mut self.state);

        match self.backend.start_scan(&request).await {
            Ok(response) => {
                tracing::info!(
                    scan_id = response.scan_id,
                    project_id = request.project_id,
                    targets = request.targets.len(),
                    chunk_size = request.chunk_size,
                    concurrency = request.concurrency,
                    status = %response.status,
                    "Scan started",
                );
                attempt.settle(LifecycleState::Running {
                    scan_id: response.scan_id,
                });
                Ok(response.scan_id)
            }
            Err(e) => {
                tracing::warn!(project_id = request.project_id, error = %e, "Scan start failed");
                attempt.settle(LifecycleState::Idle);
                Err(LifecycleError::from_api("start", e))
            }
        }
    }

    /// Ask the backend to stop the running scan.
    ///
    /// On failure the state stays `Running` and the stop can be retried.
    pub async fn stop(&mut self) -> Result<serde_json::Value, LifecycleError> {
        let LifecycleState::Running { scan_id } = self.state else {
            return Err(LifecycleError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        };

        match self.backend.stop_scan(scan_id).await {
            Ok(body) => {
                tracing::info!(scan_id, "Scan stop requested");
                self.state = LifecycleState::Stopped { scan_id };
                Ok(body)
            }
            Err(e) => {
                tracing::warn!(scan_id, error = %e, "Scan stop failed");
                Err(LifecycleError::from_api("stop", e))
            }
        }
    }

    /// Feed a status reported by the backend (poll or push).
    ///
    /// Only a running scan moves, and only to the terminal state the
    /// backend names. Returns whether the state changed.
    pub fn observe_status(&mut self, status: &str) -> bool {
        let LifecycleState::Running { scan_id } = self.state else {
            return false;
        };
        let status = status.trim();

        let next = if status.eq_ignore_ascii_case(SCAN_STATUS_COMPLETED) {
            LifecycleState::Completed { scan_id }
        } else if status.eq_ignore_ascii_case(SCAN_STATUS_STOPPED) {
            LifecycleState::Stopped { scan_id }
        } else if status.eq_ignore_ascii_case(SCAN_STATUS_FAILED) {
            LifecycleState::Failed { scan_id }
        } else {
            if !is_running_status(status) {
                tracing::trace!(scan_id, status, "Non-terminal status observed");
            }
            return false;
        };

        tracing::info!(scan_id, status, "Scan reached terminal status");
        self.state = next;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Holds the controller in `Starting` while a start request is in flight.
///
/// If dropped unsettled, e.g. because the `start` future was cancelled,
/// the state falls back to `Idle` so a later start is accepted.
struct StartAttempt<'a> {
    state: &'a mut LifecycleState,
}

impl<'a> StartAttempt<'a> {
    fn begin(state: &'a mut LifecycleState) -> Self {
        *state = LifecycleState::Starting;
        Self { state }
    }

    fn settle(self, next: LifecycleState) {
        *self.state = next;
    }
}

impl Drop for StartAttempt<'_> {
    fn drop(&mut self) {
        if *self.state == LifecycleState::Starting {
            tracing::debug!("Scan start abandoned before the backend answered");
            *self.state = LifecycleState::Idle;
        }
    }
}
