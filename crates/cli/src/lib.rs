//! `scanwatch` library crate.
//!
//! Re-exports the command-line definition, subcommand execution and text
//! rendering for integration testing. The binary entrypoint lives in
//! `main.rs`.

pub mod cli;
pub mod commands;
pub mod render;
