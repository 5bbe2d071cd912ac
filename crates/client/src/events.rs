//! Project-level events emitted by [`ProjectMonitor`](crate::monitor::ProjectMonitor).

use serde::Serialize;
use scanwatch_core::types::DbId;

/// A change in a project's scan list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A scan appeared in the listing and is now monitored.
    ScanAdded { scan_id: DbId, status: String },

    /// The listed status of a monitored scan changed.
    StatusChanged {
        scan_id: DbId,
        previous: String,
        status: String,
    },

    /// A scan disappeared from the listing; its monitor was shut down.
    ScanRemoved { scan_id: DbId },

    /// Fetching the scan listing failed. Existing monitors keep running.
    ListingFailed { error: String },
}

impl MonitorEvent {
    pub fn scan_id(&self) -> Option<DbId> {
        match self {
            MonitorEvent::ScanAdded { scan_id, .. }
            | MonitorEvent::StatusChanged { scan_id, .. }
            | MonitorEvent::ScanRemoved { scan_id } => Some(*scan_id),
            MonitorEvent::ListingFailed { .. } => None,
        }
    }
}
