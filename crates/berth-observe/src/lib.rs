//! Logging bootstrap for the berth binaries.
//!
//! Every crate logs through the `tracing` facade; this crate installs the global subscriber once at startup.

mod logger;
pub use logger::*;
