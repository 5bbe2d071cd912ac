//! Command-line surface of the `scanwatch` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use scanwatch_core::scan::{
    DEFAULT_CONCURRENCY, DEFAULT_NMAP_FLAGS, DEFAULT_QUICK_SCAN_FLAGS, RUNNER_ASYNCIO,
    RUNNER_MULTIPROCESSING,
};
use scanwatch_core::targets::DEFAULT_CHUNK_SIZE;
use scanwatch_core::types::DbId;

/// scanwatch: submit network scans and watch them run.
#[derive(Debug, Parser)]
#[command(name = "scanwatch", version, long_about = None)]
pub struct Cli {
    /// REST base URL of the scan backend.
    #[arg(long, env = "SCANWATCH_API_URL", global = true)]
    pub api_url: Option<String>,

    /// WebSocket base URL of the scan backend.
    #[arg(long, env = "SCANWATCH_WS_URL", global = true)]
    pub ws_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List projects.
    Projects,

    /// Create a project.
    CreateProject {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Expand targets (one per line) and print the resulting batches.
    Expand {
        /// Target file; stdin when omitted.
        file: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, allow_negative_numbers = true)]
        chunk_size: i64,
    },

    /// Expand targets and start a scan.
    Start(StartArgs),

    /// Stop a running scan.
    Stop { scan_id: DbId },

    /// Run one synchronous scan outside any project and print its output.
    QuickScan(QuickScanArgs),

    /// List every project's scans.
    Scans,

    /// Follow one scan until it finishes.
    Watch {
        scan_id: DbId,
        /// Owning project; narrows the scan lookup.
        #[arg(long)]
        project: Option<DbId>,
    },

    /// Follow every scan of a project until interrupted.
    WatchProject { project_id: DbId },

    /// Follow every scan of every project until interrupted.
    WatchAll,

    /// List the hosts found by a scan.
    Hosts { scan_id: DbId },

    /// Show one host with its ports.
    Host { host_id: DbId },

    /// Show the scans that covered an address.
    History { address: String },
}

#[derive(Debug, Args)]
pub struct StartArgs {
    #[arg(long)]
    pub project: DbId,

    /// Target file; stdin when omitted.
    pub file: Option<PathBuf>,

    /// nmap flags, whitespace separated.
    #[arg(long, default_value = DEFAULT_NMAP_FLAGS, allow_hyphen_values = true)]
    pub flags: String,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, allow_negative_numbers = true)]
    pub chunk_size: i64,

    /// Batches the backend runs at once.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: u32,

    #[arg(long, value_parser = [RUNNER_ASYNCIO, RUNNER_MULTIPROCESSING])]
    pub runner: Option<String>,

    /// Follow the scan after starting it.
    #[arg(long)]
    pub watch: bool,
}

#[derive(Debug, Args)]
pub struct QuickScanArgs {
    /// Target file; stdin when omitted.
    pub file: Option<PathBuf>,

    /// nmap flags, whitespace separated.
    #[arg(long, default_value = DEFAULT_QUICK_SCAN_FLAGS, allow_hyphen_values = true)]
    pub flags: String,

    /// The request lasts as long as the scan itself.
    #[arg(long, default_value_t = 600)]
    pub timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_uses_defaults() {
        let cli = Cli::try_parse_from(["scanwatch", "start", "--project", "3", "targets.txt"]).unwrap();
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.project, 3);
        assert_eq!(args.file, Some(PathBuf::from("targets.txt")));
        assert_eq!(args.flags, "-T4 -Pn -sS");
        assert_eq!(args.chunk_size, 256);
        assert_eq!(args.concurrency, 6);
        assert_eq!(args.runner, None);
        assert!(!args.watch);
    }

    #[test]
    fn start_accepts_hyphenated_flags_and_runner() {
        let cli = Cli::try_parse_from([
            "scanwatch",
            "start",
            "--project",
            "1",
            "--flags",
            "-sV -p 1-1000",
            "--chunk-size",
            "-5",
            "--runner",
            "asyncio",
            "--watch",
        ])
        .unwrap();
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.flags, "-sV -p 1-1000");
        assert_eq!(args.chunk_size, -5);
        assert_eq!(args.runner.as_deref(), Some("asyncio"));
        assert!(args.watch);
    }

    #[test]
    fn unknown_runner_is_rejected() {
        let result = Cli::try_parse_from([
            "scanwatch", "start", "--project", "1", "--runner", "threads",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn watch_takes_optional_project() {
        let cli = Cli::try_parse_from(["scanwatch", "watch", "12", "--project", "4"]).unwrap();
        assert_matches!(
            cli.command,
            Command::Watch {
                scan_id: 12,
                project: Some(4)
            }
        );
    }

    #[test]
    fn quick_scan_defaults_to_service_detection() {
        let cli = Cli::try_parse_from(["scanwatch", "quick-scan", "hosts.txt"]).unwrap();
        let Command::QuickScan(args) = cli.command else {
            panic!("expected quick-scan");
        };
        assert_eq!(args.file, Some(PathBuf::from("hosts.txt")));
        assert_eq!(args.flags, "-T4 -Pn -sV");
        assert_eq!(args.timeout_secs, 600);
    }

    #[test]
    fn listing_commands_parse() {
        let cli = Cli::try_parse_from(["scanwatch", "scans"]).unwrap();
        assert_matches!(cli.command, Command::Scans);
        let cli = Cli::try_parse_from(["scanwatch", "watch-all"]).unwrap();
        assert_matches!(cli.command, Command::WatchAll);
    }
}
