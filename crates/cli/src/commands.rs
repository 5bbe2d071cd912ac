//! Subcommand execution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use scanwatch_client::api::ScanApi;
use scanwatch_client::backend::ScanBackend;
use scanwatch_client::client::ScanStreamClient;
use scanwatch_client::config::MonitorConfig;
use scanwatch_client::events::MonitorEvent;
use scanwatch_client::lifecycle::{ScanLifecycle, ScanSubmission};
use scanwatch_client::monitor::{ListingScope, ProjectMonitor, ScanMonitor};
use scanwatch_client::partitioner::TargetPartitioner;
use scanwatch_client::view::ScanView;
use scanwatch_core::models::{NewProject, RunNmapRequest};
use scanwatch_core::scan::{split_flags, validate_flags};
use scanwatch_core::targets::normalize_target_lines;
use scanwatch_core::types::DbId;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::cli::{Cli, Command, QuickScanArgs, StartArgs};
use crate::render::{self, ScanFollower};

/// Scanner output lines kept by `quick-scan`.
const QUICK_SCAN_OUTPUT_LINES: usize = 2000;

/// Everything a subcommand needs to talk to the backend.
pub struct AppContext {
    pub config: MonitorConfig,
    pub api: Arc<ScanApi>,
    pub stream_client: Arc<ScanStreamClient>,
}

impl AppContext {
    /// Environment configuration with CLI overrides applied.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = MonitorConfig::from_env();
        if let Some(api_url) = &cli.api_url {
            config.api_url = api_url.clone();
        }
        if let Some(ws_url) = &cli.ws_url {
            config.ws_url = ws_url.clone();
        }

        let api = ScanApi::with_timeout(config.api_url.clone(), config.request_timeout)
            .context("Failed to build HTTP client")?;
        let stream_client = ScanStreamClient::new(config.ws_url.clone());

        Ok(Self {
            config,
            api: Arc::new(api),
            stream_client: Arc::new(stream_client),
        })
    }

    fn backend(&self) -> Arc<dyn ScanBackend> {
        self.api.clone()
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext::from_cli(&cli)?;

    match cli.command {
        Command::Projects => {
            let projects = ctx.api.list_projects().await?;
            println!("{}", render::projects(&projects));
        }
        Command::CreateProject { name, description } => {
            let project = ctx
                .api
                .create_project(&NewProject { name, description })
                .await?;
            println!("created project {} ({})", project.id, project.name);
        }
        Command::Expand { file, chunk_size } => {
            let lines = read_lines(file.as_deref()).await?;
            let partitioner = TargetPartitioner::new(ctx.backend());
            let (_, batches) = partitioner.expand_and_chunk(&lines, chunk_size).await?;
            println!("{}", render::batches(&batches));
        }
        Command::Start(args) => start(&ctx, args).await?,
        Command::Stop { scan_id } => {
            let mut lifecycle = ScanLifecycle::adopt(ctx.backend(), scan_id, "running");
            let body = lifecycle.stop().await?;
            println!("stop requested for scan {scan_id}: {body}");
        }
        Command::QuickScan(args) => quick_scan(&ctx, args).await?,
        Command::Scans => {
            let scans = ctx.api.list_all_scans().await?;
            println!("{}", render::scans(&scans));
        }
        Command::Watch { scan_id, project } => {
            watch_scan(&ctx, scan_id, project, false, None).await?;
        }
        Command::WatchProject { project_id } => {
            watch_listing(&ctx, ListingScope::Project(project_id)).await?
        }
        Command::WatchAll => watch_listing(&ctx, ListingScope::AllProjects).await?,
        Command::Hosts { scan_id } => {
            let hosts = ctx.api.list_scan_hosts(scan_id).await?;
            println!("{}", render::hosts(&hosts));
        }
        Command::Host { host_id } => {
            let host = ctx.api.get_host(host_id).await?;
            println!("{}", render::host_detail(&host));
        }
        Command::History { address } => {
            let scans = ctx.api.get_target_history(&address).await?;
            println!("{}", render::scans(&scans));
        }
    }

    Ok(())
}

async fn start(ctx: &AppContext, args: StartArgs) -> Result<()> {
    let lines = read_lines(args.file.as_deref()).await?;
    let partitioner = TargetPartitioner::new(ctx.backend());
    let (set, batches) = partitioner
        .expand_and_chunk(&lines, args.chunk_size)
        .await?;
    println!("{} targets in {} batches", set.len(), batches.len());

    let mut submission = ScanSubmission::new(
        args.project,
        split_flags(&args.flags),
        batches,
        args.chunk_size,
    )
    .with_concurrency(args.concurrency);
    if let Some(runner) = args.runner {
        submission = submission.with_runner(runner);
    }

    let mut lifecycle = ScanLifecycle::new(ctx.backend());
    let scan_id = lifecycle.start(&submission).await?;
    println!("scan {scan_id} started");

    if args.watch {
        watch_scan(ctx, scan_id, Some(args.project), true, Some(&mut lifecycle)).await?;
    }
    Ok(())
}

/// Print a scan's log and status changes until it is terminal or Ctrl-C.
async fn watch_scan(
    ctx: &AppContext,
    scan_id: DbId,
    project_id: Option<DbId>,
    initially_running: bool,
    mut lifecycle: Option<&mut ScanLifecycle>,
) -> Result<()> {
    let monitor = ScanMonitor::start(
        ctx.backend(),
        Arc::clone(&ctx.stream_client),
        &ctx.config,
        scan_id,
        project_id,
        initially_running,
    );

    let mut rx = monitor.view().subscribe();
    let mut follower = ScanFollower::new();

    loop {
        // The view is released before waiting so the store can update in
        // place.
        let done = {
            let view = rx.borrow_and_update().clone();
            for line in follower.take_updates(&view) {
                println!("{line}");
            }
            if let (Some(lifecycle), Some(snapshot)) = (lifecycle.as_deref_mut(), &view.snapshot) {
                lifecycle.observe_status(&snapshot.scan.status);
            }
            // Only the snapshot may end the watch; a quiet stream never does.
            view.snapshot.is_some() && view.is_terminal()
        };
        if done {
            break;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted");
                break;
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}

/// Run one synchronous scan and print its output and hosts.
async fn quick_scan(ctx: &AppContext, args: QuickScanArgs) -> Result<()> {
    let lines = read_lines(args.file.as_deref()).await?;
    let targets: Vec<String> = normalize_target_lines(&lines)
        .into_iter()
        .map(|t| t.into_string())
        .collect();
    let nmap_flags = split_flags(&args.flags);
    validate_flags(&nmap_flags)?;

    // Separate client: the request lasts as long as the scan.
    let api = ScanApi::with_timeout(
        ctx.config.api_url.clone(),
        Duration::from_secs(args.timeout_secs),
    )
    .context("Failed to build HTTP client")?;
    println!("scanning {} targets", targets.len());

    let response = api
        .run_nmap(&RunNmapRequest {
            nmap_flags,
            targets,
        })
        .await?;
    println!("{}", render::quick_scan(&response, QUICK_SCAN_OUTPUT_LINES));
    Ok(())
}

/// Print listing changes plus every listed scan's log and status until
/// Ctrl-C.
async fn watch_listing(ctx: &AppContext, scope: ListingScope) -> Result<()> {
    let monitor = ProjectMonitor::with_scope(
        ctx.backend(),
        Arc::clone(&ctx.stream_client),
        ctx.config.clone(),
        scope,
    );
    let mut events = monitor.subscribe();
    monitor.start_listing().await;
    match scope {
        ListingScope::Project(project_id) => println!("watching project {project_id}"),
        ListingScope::AllProjects => println!("watching all projects"),
    }

    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();
    let mut forwarders = JoinSet::new();
    let mut followers: HashMap<DbId, ScanFollower> = HashMap::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", render::monitor_event(&event));
                    match &event {
                        MonitorEvent::ScanAdded { scan_id, .. } => {
                            if let Some(view) = monitor.view(*scan_id).await {
                                forwarders.spawn(forward_view_changes(
                                    *scan_id,
                                    view.subscribe(),
                                    changed_tx.clone(),
                                ));
                            }
                        }
                        MonitorEvent::ScanRemoved { scan_id } => {
                            followers.remove(scan_id);
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Monitor events lagged");
                }
                Err(RecvError::Closed) => break,
            },
            Some(scan_id) = changed_rx.recv() => {
                if let Some(view) = monitor.view(scan_id).await {
                    let view = view.current();
                    let follower = followers
                        .entry(scan_id)
                        .or_insert_with(|| ScanFollower::tagged(scan_id));
                    for line in follower.take_updates(&view) {
                        println!("{line}");
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted");
                break;
            }
        }
    }

    forwarders.abort_all();
    monitor.shutdown().await;
    Ok(())
}

/// Send `scan_id` once now and again after every published view.
///
/// Ends when the view store exits or the receiving loop is gone. Holds only
/// a receiver so it never keeps the store alive.
async fn forward_view_changes(
    scan_id: DbId,
    mut rx: watch::Receiver<Arc<ScanView>>,
    changed: mpsc::UnboundedSender<DbId>,
) {
    loop {
        if changed.send(scan_id).is_err() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Target lines from `path`, or from stdin when `None`.
async fn read_lines(path: Option<&Path>) -> Result<Vec<String>> {
    let text = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read targets from stdin")?;
            text
        }
    };

    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        bail!("no targets given");
    }
    Ok(lines)
}
