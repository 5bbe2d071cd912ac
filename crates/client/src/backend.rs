//! The backend seam used by the monitoring pipeline.
//!
//! [`ScanBackend`] covers the endpoints the partitioner, lifecycle
//! controller and polling synchronizer call. [`ScanApi`](crate::api::ScanApi)
//! is the production implementation; tests substitute a scripted mock.

use async_trait::async_trait;
use scanwatch_core::models::{Host, Scan, ScanBatch, StartScanRequest, StartScanResponse};
use scanwatch_core::types::DbId;

use crate::api::ApiError;

#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// `POST /targets/expand`: resolve CIDR blocks and hostnames into a
    /// flat, ordered address list.
    async fn expand_targets(&self, targets: &[String]) -> Result<Vec<String>, ApiError>;

    /// `POST /scans/start`.
    async fn start_scan(&self, request: &StartScanRequest) -> Result<StartScanResponse, ApiError>;

    /// `POST /scans/{id}/stop`. The response body is backend-defined.
    async fn stop_scan(&self, scan_id: DbId) -> Result<serde_json::Value, ApiError>;

    /// `GET /projects/{id}/scans`.
    async fn list_project_scans(&self, project_id: DbId) -> Result<Vec<Scan>, ApiError>;

    /// `GET /scans`.
    async fn list_all_scans(&self) -> Result<Vec<Scan>, ApiError>;

    /// `GET /scans/{id}/batches`.
    async fn list_scan_batches(&self, scan_id: DbId) -> Result<Vec<ScanBatch>, ApiError>;

    /// `GET /scans/{id}/hosts`.
    async fn list_scan_hosts(&self, scan_id: DbId) -> Result<Vec<Host>, ApiError>;
}
