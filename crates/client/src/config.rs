use std::str::FromStr;
use std::time::Duration;

use crate::consumer::{StreamConfig, DEFAULT_FIRST_MESSAGE_TIMEOUT, DEFAULT_IDLE_TIMEOUT};
use crate::feed::DEFAULT_LOG_CAPACITY;
use crate::poller::{PollConfig, TerminalPolicy, DEFAULT_POLL_INTERVAL};

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Default WebSocket base URL.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080";

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Monitoring configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend on localhost.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub api_url: String,
    pub ws_url: String,
    pub request_timeout: Duration,
    pub poll: PollConfig,
    pub stream: StreamConfig,
    /// Rolling log capacity per scan.
    pub log_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll: PollConfig::default(),
            stream: StreamConfig::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                                | Default                     |
    /// |----------------------------------------|-----------------------------|
    /// | `SCANWATCH_API_URL`                    | `http://localhost:8080/api` |
    /// | `SCANWATCH_WS_URL`                     | `ws://localhost:8080`       |
    /// | `SCANWATCH_REQUEST_TIMEOUT_SECS`       | `30`                        |
    /// | `SCANWATCH_POLL_INTERVAL_SECS`         | `5`                         |
    /// | `SCANWATCH_TERMINAL_POLL_SECS`         | unset (stop polling)        |
    /// | `SCANWATCH_LOG_CAPACITY`               | `2000`                      |
    /// | `SCANWATCH_FIRST_MESSAGE_TIMEOUT_SECS` | `30`                        |
    /// | `SCANWATCH_IDLE_TIMEOUT_SECS`          | `300` (`0` disables)        |
    ///
    /// Unparseable values are logged and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("SCANWATCH_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let ws_url = lookup("SCANWATCH_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.into());

        let request_timeout = Duration::from_secs(parse_or(
            &lookup,
            "SCANWATCH_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        ));

        let interval_secs = parse_or(
            &lookup,
            "SCANWATCH_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL.as_secs(),
        )
        .max(1);
        let terminal = match parse_opt::<u64, _>(&lookup, "SCANWATCH_TERMINAL_POLL_SECS") {
            Some(secs) if secs > 0 => TerminalPolicy::Degrade(Duration::from_secs(secs)),
            _ => TerminalPolicy::Stop,
        };

        let first_message_secs = parse_or(
            &lookup,
            "SCANWATCH_FIRST_MESSAGE_TIMEOUT_SECS",
            DEFAULT_FIRST_MESSAGE_TIMEOUT.as_secs(),
        )
        .max(1);
        let idle_secs = parse_or(
            &lookup,
            "SCANWATCH_IDLE_TIMEOUT_SECS",
            DEFAULT_IDLE_TIMEOUT.as_secs(),
        );

        let log_capacity = parse_or(&lookup, "SCANWATCH_LOG_CAPACITY", DEFAULT_LOG_CAPACITY).max(1);

        Self {
            api_url,
            ws_url,
            request_timeout,
            poll: PollConfig {
                interval: Duration::from_secs(interval_secs),
                terminal,
            },
            stream: StreamConfig {
                first_message_timeout: Duration::from_secs(first_message_secs),
                idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            },
            log_capacity,
        }
    }
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    parse_opt(lookup, key).unwrap_or(default)
}
