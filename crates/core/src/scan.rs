//! Scan status vocabulary and scan configuration helpers.
//!
//! Status strings are defined by the backend and treated as opaque; the
//! constants below are the values the client knows how to classify.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Scan status constants
// ---------------------------------------------------------------------------

/// Pending: scan row created, no batch has started yet.
pub const SCAN_STATUS_PENDING: &str = "pending";

/// Running: at least one batch is executing.
pub const SCAN_STATUS_RUNNING: &str = "running";

/// Started: returned by the start endpoint for a freshly queued scan.
pub const SCAN_STATUS_STARTED: &str = "started";

/// Completed: every batch finished.
pub const SCAN_STATUS_COMPLETED: &str = "completed";

/// Stopped: cancelled by an operator.
pub const SCAN_STATUS_STOPPED: &str = "stopped";

/// Failed: the scan itself failed.
pub const SCAN_STATUS_FAILED: &str = "failed";

/// Statuses after which no further transitions are expected.
pub const TERMINAL_STATUSES: &[&str] = &[
    SCAN_STATUS_COMPLETED,
    SCAN_STATUS_STOPPED,
    SCAN_STATUS_FAILED,
];

/// Statuses under which the push channel carries live output.
const RUNNING_STATUSES: &[&str] = &[SCAN_STATUS_RUNNING, SCAN_STATUS_STARTED];

/// Whether `status` is terminal. Comparison ignores ASCII case.
pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(status.trim()))
}

/// Whether `status` means the scan is currently executing.
pub fn is_running_status(status: &str) -> bool {
    RUNNING_STATUSES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(status.trim()))
}

// ---------------------------------------------------------------------------
// Scan configuration
// ---------------------------------------------------------------------------

/// Default nmap flags offered for a new scan.
pub const DEFAULT_NMAP_FLAGS: &str = "-T4 -Pn -sS";

/// Default nmap flags for a one-off quick scan.
pub const DEFAULT_QUICK_SCAN_FLAGS: &str = "-T4 -Pn -sV";

/// Default number of batches the backend runs concurrently.
pub const DEFAULT_CONCURRENCY: u32 = 6;

/// Backend runner based on an asyncio process pool.
pub const RUNNER_ASYNCIO: &str = "asyncio";

/// Legacy multiprocessing runner.
pub const RUNNER_MULTIPROCESSING: &str = "multiprocessing";

const ALL_RUNNERS: &[&str] = &[RUNNER_ASYNCIO, RUNNER_MULTIPROCESSING];

/// Split a flag string on whitespace, dropping empty pieces.
pub fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

/// A scan needs at least one non-blank flag.
pub fn validate_flags(flags: &[String]) -> Result<(), CoreError> {
    if flags.iter().all(|f| f.trim().is_empty()) {
        return Err(CoreError::Validation(
            "at least one nmap flag is required".to_string(),
        ));
    }
    Ok(())
}

/// Validate a runner name against the known runners.
pub fn validate_runner(runner: &str) -> Result<(), CoreError> {
    if ALL_RUNNERS.contains(&runner) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid runner '{runner}'. Must be one of: {}",
            ALL_RUNNERS.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
