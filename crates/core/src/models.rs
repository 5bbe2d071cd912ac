//! JSON models exchanged with the scan orchestration backend.
//!
//! Field names match the backend's wire format. Timestamps are accepted
//! either as RFC 3339 strings or as naive ISO-8601 strings (interpreted
//! as UTC), since the backend stores naive UTC datetimes.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: DbId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of `POST /projects`.
#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Scans and batches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: DbId,
    pub project_id: DbId,
    /// Backend-defined status string, see [`crate::scan`].
    pub status: String,
    #[serde(default, deserialize_with = "backend_time::deserialize_opt")]
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "backend_time::deserialize_opt")]
    pub finished_at: Option<Timestamp>,
}

/// Wrapper returned by `GET /scans`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListAllScansResponse {
    pub scans: Vec<Scan>,
}

/// A batch as persisted by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanBatch {
    pub id: DbId,
    pub scan_id: DbId,
    pub status: String,
    pub target_count: i64,
    #[serde(default, deserialize_with = "backend_time::deserialize_opt")]
    pub started_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "backend_time::deserialize_opt")]
    pub finished_at: Option<Timestamp>,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Body of `POST /scans/start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartScanRequest {
    pub project_id: DbId,
    pub nmap_flags: Vec<String>,
    pub targets: Vec<String>,
    pub chunk_size: i64,
    pub concurrency: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartScanResponse {
    pub scan_id: DbId,
    #[serde(default)]
    pub status: String,
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

/// Host status reported for a reachable host.
pub const HOST_STATUS_UP: &str = "up";

/// Port state reported for an open port.
pub const PORT_STATE_OPEN: &str = "open";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: DbId,
    pub port_number: i32,
    pub protocol: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_version: Option<String>,
}

impl Port {
    pub fn is_open(&self) -> bool {
        self.state.eq_ignore_ascii_case(PORT_STATE_OPEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: DbId,
    pub scan_id: DbId,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub status: String,
    #[serde(default)]
    pub ports: Vec<Port>,
}

impl Host {
    pub fn is_up(&self) -> bool {
        self.status.eq_ignore_ascii_case(HOST_STATUS_UP)
    }

    pub fn open_port_count(&self) -> usize {
        self.ports.iter().filter(|p| p.is_open()).count()
    }
}

// ---------------------------------------------------------------------------
// Target expansion
// ---------------------------------------------------------------------------

/// Body of `POST /targets/expand`.
#[derive(Debug, Clone, Serialize)]
pub struct ExpandTargetsRequest {
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpandTargetsResponse {
    pub targets: Vec<String>,
}

/// Body of `POST /nmap/run`: one synchronous scanner run outside any
/// project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunNmapRequest {
    pub nmap_flags: Vec<String>,
    pub targets: Vec<String>,
}

/// Result of `POST /nmap/run`: raw scanner output plus parsed hosts.
#[derive(Debug, Clone, Deserialize)]
pub struct RunNmapResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl RunNmapResponse {
    /// The last `max` lines of scanner output.
    pub fn stdout_tail(&self, max: usize) -> Vec<&str> {
        let lines: Vec<&str> = self.stdout.lines().collect();
        let skip = lines.len().saturating_sub(max);
        lines[skip..].to_vec()
    }
}

// ---------------------------------------------------------------------------
// Timestamp parsing
// ---------------------------------------------------------------------------

mod backend_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    use crate::types::Timestamp;

    pub fn parse(raw: &str) -> Option<Timestamp> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn scan_accepts_naive_and_rfc3339_timestamps() {
        let json = r#"{"id":7,"project_id":1,"status":"running",
            "started_at":"2024-05-01T12:30:00.123456",
            "finished_at":"2024-05-01T13:00:00+00:00"}"#;
        let scan: Scan = serde_json::from_str(json).unwrap();
        let started = scan.started_at.unwrap();
        assert_eq!((started.year(), started.hour(), started.minute()), (2024, 12, 30));
        assert_eq!(scan.finished_at.unwrap().hour(), 13);
    }

    #[test]
    fn scan_missing_or_null_timestamps_are_none() {
        let scan: Scan =
            serde_json::from_str(r#"{"id":1,"project_id":2,"status":"pending","finished_at":null}"#)
                .unwrap();
        assert!(scan.started_at.is_none());
        assert!(scan.finished_at.is_none());
    }

    #[test]
    fn run_nmap_response_tolerates_missing_hosts() {
        let response: RunNmapResponse =
            serde_json::from_str(r#"{"stdout":"a\nb\nc\n"}"#).unwrap();
        assert!(response.hosts.is_empty());
        assert_eq!(response.stdout_tail(2), vec!["b", "c"]);
        assert_eq!(response.stdout_tail(10).len(), 3);
    }

    #[test]
    fn invalid_timestamp_is_rejected() {
        let result = serde_json::from_str::<Scan>(
            r#"{"id":1,"project_id":2,"status":"pending","started_at":"yesterday"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn start_request_omits_runner_when_unset() {
        let req = StartScanRequest {
            project_id: 3,
            nmap_flags: vec!["-sS".into()],
            targets: vec!["192.0.2.1".into()],
            chunk_size: 256,
            concurrency: 6,
            runner: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("runner").is_none());
        assert_eq!(value["chunk_size"], 256);
        assert_eq!(value["targets"][0], "192.0.2.1");
    }

    #[test]
    fn host_counts_open_ports() {
        let json = r#"{"id":1,"scan_id":2,"address":"192.0.2.1","status":"up","ports":[
            {"id":1,"port_number":22,"protocol":"tcp","state":"open"},
            {"id":2,"port_number":23,"protocol":"tcp","state":"closed"},
            {"id":3,"port_number":80,"protocol":"tcp","state":"open","service_name":"http"}]}"#;
        let host: Host = serde_json::from_str(json).unwrap();
        assert!(host.is_up());
        assert_eq!(host.open_port_count(), 2);
        assert_eq!(host.ports[2].service_name.as_deref(), Some("http"));
    }

    #[test]
    fn project_description_is_optional() {
        let p: Project = serde_json::from_str(r#"{"id":1,"name":"lab"}"#).unwrap();
        assert_eq!(p.description, None);
    }
}
