//! REST API client for the scan orchestration backend.
//!
//! Wraps every HTTP endpoint the client uses (projects, scan start/stop,
//! scan/batch/host listings, target history, target expansion and the
//! one-off quick scan) using
//! [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use scanwatch_core::models::{
    ExpandTargetsRequest, ExpandTargetsResponse, Host, ListAllScansResponse, NewProject, Project,
    RunNmapRequest, RunNmapResponse, Scan, ScanBatch, StartScanRequest, StartScanResponse,
};
use scanwatch_core::types::DbId;

use crate::backend::ScanBackend;

/// HTTP client for one backend instance.
#[derive(Debug, Clone)]
pub struct ScanApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Scan API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A URL could not be built from the configured base.
    #[error("Invalid URL: {0}")]
    Url(String),
}

impl ApiError {
    /// HTTP status of the failed response, if the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
            ApiError::Url(_) => None,
        }
    }
}

impl ScanApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL including any prefix, e.g.
    ///   `http://host:8080/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Create an API client whose requests time out after `timeout`.
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("scanwatch/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Base HTTP URL (without trailing slash).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Create a project. `POST /projects`.
    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ApiError> {
        let response = self
            .client
            .post(self.url("/projects"))
            .json(project)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// List all projects. `GET /projects`.
    pub async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        let response = self.client.get(self.url("/projects")).send().await?;
        Self::parse_response(response).await
    }

    /// Fetch one host with its ports. `GET /hosts/{id}`.
    pub async fn get_host(&self, host_id: DbId) -> Result<Host, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/hosts/{host_id}")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Every scan that included `address`. `GET /targets/{address}/history`.
    ///
    /// The address is sent as a single path segment, so IPv6 literals and
    /// CIDR slashes are percent-encoded.
    pub async fn get_target_history(&self, address: &str) -> Result<Vec<Scan>, ApiError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| ApiError::Url(format!("{}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(format!("{} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(["targets", address, "history"]);

        let response = self.client.get(url).send().await?;
        Self::parse_response(response).await
    }

    /// Run the scanner once and wait for its output. `POST /nmap/run`.
    ///
    /// Nothing is stored under a project; the request lasts as long as the
    /// scan, so callers should allow a generous timeout.
    pub async fn run_nmap(&self, request: &RunNmapRequest) -> Result<RunNmapResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/nmap/run"))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ScanBackend for ScanApi {
    async fn expand_targets(&self, targets: &[String]) -> Result<Vec<String>, ApiError> {
        let body = ExpandTargetsRequest {
            targets: targets.to_vec(),
        };

        let response = self
            .client
            .post(self.url("/targets/expand"))
            .json(&body)
            .send()
            .await?;

        let expanded: ExpandTargetsResponse = Self::parse_response(response).await?;
        Ok(expanded.targets)
    }

    async fn start_scan(&self, request: &StartScanRequest) -> Result<StartScanResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/scans/start"))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn stop_scan(&self, scan_id: DbId) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/scans/{scan_id}/stop")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn list_project_scans(&self, project_id: DbId) -> Result<Vec<Scan>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/projects/{project_id}/scans")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn list_all_scans(&self) -> Result<Vec<Scan>, ApiError> {
        let response = self.client.get(self.url("/scans")).send().await?;
        let wrapper: ListAllScansResponse = Self::parse_response(response).await?;
        Ok(wrapper.scans)
    }

    async fn list_scan_batches(&self, scan_id: DbId) -> Result<Vec<ScanBatch>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/scans/{scan_id}/batches")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn list_scan_hosts(&self, scan_id: DbId) -> Result<Vec<Host>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/scans/{scan_id}/hosts")))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ScanApi::new("http://localhost:8080/api/");
        assert_eq!(api.api_url(), "http://localhost:8080/api");
        assert_eq!(api.url("/scans"), "http://localhost:8080/api/scans");
    }

    #[test]
    fn status_error_exposes_code() {
        let err = ApiError::Status {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "Scan API error (503): busy");
    }

    #[test]
    fn url_error_has_no_status() {
        assert_eq!(ApiError::Url("x".into()).status(), None);
    }
}
