//! Core library for dockhand
//!
//! This crate contains the solution installation pipeline: host command
//! execution, environment file reconciliation, repository structure probing,
//! compose tool resolution, build strategy selection and the installer that
//! drives them, plus configuration, logging and error handling.

pub mod command;
pub mod compose;
pub mod config;
pub mod docker;
pub mod env_file;
pub mod errors;
pub mod installer;
pub mod logging;
pub mod redaction;
pub mod registry;
pub mod strategy;
pub mod structure;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
