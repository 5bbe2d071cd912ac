//! Domain types for the scanwatch client.
//!
//! Everything in this crate is pure: target normalisation and chunking,
//! the scan status vocabulary, and the JSON models exchanged with the
//! scan orchestration backend. Network and task code lives in
//! `scanwatch-client`.

pub mod error;
pub mod models;
pub mod scan;
pub mod targets;
pub mod types;
