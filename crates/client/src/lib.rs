//! Scan monitoring client library.
//!
//! Provides the REST and WebSocket clients for the scan orchestration
//! backend, typed push-channel message parsing, the per-scan view store,
//! the event stream consumer and polling synchronizer that feed it, target
//! partitioning, the scan lifecycle controller, and scan/project monitors
//! that compose all of the above.

pub mod api;
pub mod backend;
pub mod client;
pub mod config;
pub mod consumer;
pub mod events;
pub mod feed;
pub mod lifecycle;
pub mod messages;
pub mod monitor;
pub mod partitioner;
pub mod poller;
pub mod view;

#[cfg(test)]
mod mock;
