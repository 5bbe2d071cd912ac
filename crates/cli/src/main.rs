//! `scanwatch` -- submit network scans and watch them run.
//!
//! Talks to the scan orchestration backend over REST and follows running
//! scans over their WebSocket push channel.
//!
//! # Environment variables
//!
//! | Variable                               | Default                     | Description                          |
//! |----------------------------------------|-----------------------------|--------------------------------------|
//! | `SCANWATCH_API_URL`                    | `http://localhost:8080/api` | REST base URL                        |
//! | `SCANWATCH_WS_URL`                     | `ws://localhost:8080`       | WebSocket base URL                   |
//! | `SCANWATCH_REQUEST_TIMEOUT_SECS`       | `30`                        | HTTP request timeout                 |
//! | `SCANWATCH_POLL_INTERVAL_SECS`         | `5`                         | Snapshot poll interval               |
//! | `SCANWATCH_TERMINAL_POLL_SECS`         | --                          | Keep polling finished scans this slowly |
//! | `SCANWATCH_LOG_CAPACITY`               | `2000`                      | Log lines kept per scan              |
//! | `SCANWATCH_FIRST_MESSAGE_TIMEOUT_SECS` | `30`                        | Wait for the first pushed message    |
//! | `SCANWATCH_IDLE_TIMEOUT_SECS`          | `300`                       | Max silence on the push channel; `0` disables |

use clap::Parser;
use scanwatch_cli::cli::Cli;
use scanwatch_cli::commands;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::debug!(command = ?cli.command, "Starting scanwatch");

    commands::run(cli).await
}
