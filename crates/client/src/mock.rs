//! Scripted in-memory [`ScanBackend`] for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use scanwatch_core::models::{Host, Scan, ScanBatch, StartScanRequest, StartScanResponse};
use scanwatch_core::types::DbId;

use crate::api::ApiError;
use crate::backend::ScanBackend;

#[derive(Default)]
struct MockState {
    scans: Vec<Scan>,
    batches: HashMap<DbId, Vec<ScanBatch>>,
    hosts: HashMap<DbId, Vec<Host>>,
    expansions: HashMap<String, Vec<String>>,
    failures: HashMap<&'static str, u16>,
    stalls: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
    start_requests: Vec<StartScanRequest>,
    expand_requests: Vec<Vec<String>>,
    next_scan_id: DbId,
}

/// Cloneable handle; clones share state so tests can inspect calls made
/// through an `Arc<dyn ScanBackend>`.
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.lock().next_scan_id = 100;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn scan(id: DbId, project_id: DbId, status: &str) -> Scan {
        Scan {
            id,
            project_id,
            status: status.to_string(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn batch(id: DbId, scan_id: DbId, status: &str) -> ScanBatch {
        ScanBatch {
            id,
            scan_id,
            status: status.to_string(),
            target_count: 0,
            started_at: None,
            finished_at: None,
            targets: vec![],
        }
    }

    pub fn host(id: DbId, scan_id: DbId, address: &str, status: &str) -> Host {
        Host {
            id,
            scan_id,
            address: address.to_string(),
            hostname: None,
            status: status.to_string(),
            ports: vec![],
        }
    }

    pub fn add_scan(&self, scan: Scan) {
        self.lock().scans.push(scan);
    }

    pub fn remove_scan(&self, scan_id: DbId) {
        self.lock().scans.retain(|s| s.id != scan_id);
    }

    pub fn set_scan_status(&self, scan_id: DbId, status: &str) {
        if let Some(scan) = self.lock().scans.iter_mut().find(|s| s.id == scan_id) {
            scan.status = status.to_string();
        }
    }

    pub fn set_batches(&self, scan_id: DbId, batches: Vec<ScanBatch>) {
        self.lock().batches.insert(scan_id, batches);
    }

    pub fn set_hosts(&self, scan_id: DbId, hosts: Vec<Host>) {
        self.lock().hosts.insert(scan_id, hosts);
    }

    /// Expand `input` into `addresses`; unknown inputs expand to themselves.
    pub fn set_expansion(&self, input: &str, addresses: Vec<String>) {
        self.lock().expansions.insert(input.to_string(), addresses);
    }

    /// Fail the next call to `operation` with HTTP `status`.
    pub fn fail_next(&self, operation: &'static str, status: u16) {
        self.lock().failures.insert(operation, status);
    }

    /// Make the next call to `operation` never complete.
    pub fn stall_next(&self, operation: &'static str) {
        self.lock().stalls.insert(operation);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn start_requests(&self) -> Vec<StartScanRequest> {
        self.lock().start_requests.clone()
    }

    pub fn expand_requests(&self) -> Vec<Vec<String>> {
        self.lock().expand_requests.clone()
    }

    fn record(&self, operation: &'static str) -> Result<(), ApiError> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        match state.failures.remove(operation) {
            Some(status) => Err(ApiError::Status {
                status,
                body: format!("{operation} failed"),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ScanBackend for MockBackend {
    async fn expand_targets(&self, targets: &[String]) -> Result<Vec<String>, ApiError> {
        self.record("expand_targets")?;
        let mut state = self.lock();
        state.expand_requests.push(targets.to_vec());
        let expanded = targets
            .iter()
            .flat_map(|t| {
                state
                    .expansions
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| vec![t.clone()])
            })
            .collect();
        Ok(expanded)
    }

    async fn start_scan(&self, request: &StartScanRequest) -> Result<StartScanResponse, ApiError> {
        self.record("start_scan")?;
        let stalled = self.lock().stalls.remove("start_scan");
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.lock();
        let scan_id = state.next_scan_id;
        state.next_scan_id += 1;
        state.start_requests.push(request.clone());
        state
            .scans
            .push(MockBackend::scan(scan_id, request.project_id, "pending"));
        Ok(StartScanResponse {
            scan_id,
            status: "started".to_string(),
        })
    }

    async fn stop_scan(&self, scan_id: DbId) -> Result<serde_json::Value, ApiError> {
        self.record("stop_scan")?;
        let mut state = self.lock();
        match state.scans.iter_mut().find(|s| s.id == scan_id) {
            Some(scan) => {
                scan.status = "stopped".to_string();
                Ok(serde_json::json!({ "status": "cancelling" }))
            }
            None => Err(ApiError::Status {
                status: 404,
                body: "scan not found".to_string(),
            }),
        }
    }

    async fn list_project_scans(&self, project_id: DbId) -> Result<Vec<Scan>, ApiError> {
        self.record("list_project_scans")?;
        Ok(self
            .lock()
            .scans
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_all_scans(&self) -> Result<Vec<Scan>, ApiError> {
        self.record("list_all_scans")?;
        Ok(self.lock().scans.clone())
    }

    async fn list_scan_batches(&self, scan_id: DbId) -> Result<Vec<ScanBatch>, ApiError> {
        self.record("list_scan_batches")?;
        Ok(self.lock().batches.get(&scan_id).cloned().unwrap_or_default())
    }

    async fn list_scan_hosts(&self, scan_id: DbId) -> Result<Vec<Host>, ApiError> {
        self.record("list_scan_hosts")?;
        Ok(self.lock().hosts.get(&scan_id).cloned().unwrap_or_default())
    }
}
