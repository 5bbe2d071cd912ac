//! Plain-text rendering of scan state for the terminal.

use std::fmt::Write as _;

use scanwatch_client::events::MonitorEvent;
use scanwatch_client::view::{ConnectionState, ScanView, SummarySource};
use scanwatch_core::models::{Host, Project, RunNmapResponse, Scan};
use scanwatch_core::types::DbId;
use scanwatch_core::targets::Batch;

/// Tracks which log lines of a view have already been printed.
///
/// Lines evicted from the rolling log before they were printed are
/// reported as a gap instead of being silently skipped.
#[derive(Debug, Default)]
pub struct LogCursor {
    next_seq: u64,
}

impl LogCursor {
    /// Lines appended since the previous call.
    pub fn take_new(&mut self, view: &ScanView) -> Vec<String> {
        let mut lines = Vec::new();
        let log = &view.feed.log;

        if let Some(first) = log.iter().next() {
            if first.seq > self.next_seq {
                lines.push(format!("... {} lines dropped", first.seq - self.next_seq));
            }
        }
        for entry in log.since(self.next_seq) {
            lines.push(entry.text.clone());
        }
        self.next_seq = log.total_appended();
        lines
    }
}

/// What to print for one followed scan: new log lines, then the status
/// line when it changed.
#[derive(Debug, Default)]
pub struct ScanFollower {
    cursor: LogCursor,
    last_line: String,
    tag: String,
}

impl ScanFollower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log lines carry a `[scan N]` tag, for output that interleaves
    /// several scans.
    pub fn tagged(scan_id: DbId) -> Self {
        Self {
            tag: format!("[scan {scan_id}] "),
            ..Self::default()
        }
    }

    pub fn take_updates(&mut self, view: &ScanView) -> Vec<String> {
        let mut out: Vec<String> = self
            .cursor
            .take_new(view)
            .into_iter()
            .map(|line| format!("  {}{line}", self.tag))
            .collect();

        let line = scan_line(view);
        if line != self.last_line {
            out.push(line.clone());
            self.last_line = line;
        }
        out
    }
}

/// One-line status summary of a scan.
pub fn scan_line(view: &ScanView) -> String {
    let mut line = format!(
        "scan {} [{}]",
        view.scan_id,
        view.status().unwrap_or("unknown")
    );

    if let Some(snapshot) = &view.snapshot {
        let progress = snapshot.batch_progress();
        let _ = write!(
            line,
            " batches {}/{} done, {} running",
            progress.completed, progress.total, progress.running
        );
        if progress.failed > 0 {
            let _ = write!(line, ", {} failed", progress.failed);
        }
    }

    let summary = view.summary();
    let source = match summary.source {
        SummarySource::Snapshot => "snapshot",
        SummarySource::Live => "live",
    };
    let _ = write!(
        line,
        " | hosts up {}, open ports {} ({source})",
        summary.hosts_up, summary.open_ports
    );

    let stream = match view.stream_state {
        ConnectionState::Closed => "closed",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Open => "open",
    };
    let _ = write!(line, " | stream {stream}");

    if let Some(failure) = &view.poll_error {
        let _ = write!(line, " | poll failed: {}", failure.message);
    }
    line
}

pub fn batches(batches: &[Batch]) -> String {
    let mut out = String::new();
    for batch in batches {
        let first = batch.targets.first().map(|t| t.as_str()).unwrap_or("-");
        let last = batch.targets.last().map(|t| t.as_str()).unwrap_or("-");
        let _ = writeln!(
            out,
            "batch {}: {} targets ({first} .. {last})",
            batch.index,
            batch.len()
        );
    }
    let total: usize = batches.iter().map(Batch::len).sum();
    let _ = write!(out, "{} targets in {} batches", total, batches.len());
    out
}

pub fn projects(projects: &[Project]) -> String {
    let mut out = String::new();
    for project in projects {
        let _ = writeln!(
            out,
            "{:>5}  {}  {}",
            project.id,
            project.name,
            project.description.as_deref().unwrap_or("")
        );
    }
    out.trim_end().to_string()
}

pub fn scans(scans: &[Scan]) -> String {
    let mut out = String::new();
    for scan in scans {
        let started = scan
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        let _ = writeln!(
            out,
            "{:>5}  project {:<4} {:<10} {}",
            scan.id, scan.project_id, scan.status, started
        );
    }
    out.trim_end().to_string()
}

pub fn hosts(hosts: &[Host]) -> String {
    let mut out = String::new();
    for host in hosts {
        let _ = writeln!(
            out,
            "{:>5}  {:<39} {:<6} {} open  {}",
            host.id,
            host.address,
            host.status,
            host.open_port_count(),
            host.hostname.as_deref().unwrap_or("")
        );
    }
    out.trim_end().to_string()
}

pub fn host_detail(host: &Host) -> String {
    let mut out = format!("{} ({})", host.address, host.status);
    if let Some(name) = &host.hostname {
        let _ = write!(out, " {name}");
    }
    for port in &host.ports {
        let service = [
            port.service_name.as_deref(),
            port.service_product.as_deref(),
            port.service_version.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        let _ = write!(
            out,
            "\n  {}/{} {} {}",
            port.port_number, port.protocol, port.state, service
        );
    }
    out.trim_end().to_string()
}

/// Scanner output (at most `max_lines`, newest kept) followed by the
/// parsed hosts.
pub fn quick_scan(response: &RunNmapResponse, max_lines: usize) -> String {
    let mut out = String::new();
    let total = response.stdout.lines().count();
    if total > max_lines {
        let _ = writeln!(out, "... {} lines omitted", total - max_lines);
    }
    for line in response.stdout_tail(max_lines) {
        let _ = writeln!(out, "{line}");
    }

    let up = response.hosts.iter().filter(|h| h.is_up()).count();
    let _ = writeln!(out, "{} hosts, {up} up", response.hosts.len());
    for host in &response.hosts {
        let _ = writeln!(out, "{}", host_detail(host));
    }
    out.trim_end().to_string()
}

pub fn monitor_event(event: &MonitorEvent) -> String {
    match event {
        MonitorEvent::ScanAdded { scan_id, status } => format!("+ scan {scan_id} [{status}]"),
        MonitorEvent::StatusChanged {
            scan_id,
            previous,
            status,
        } => format!("~ scan {scan_id} {previous} -> {status}"),
        MonitorEvent::ScanRemoved { scan_id } => format!("- scan {scan_id}"),
        MonitorEvent::ListingFailed { error } => format!("! listing failed: {error}"),
    }
}
