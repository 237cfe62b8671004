//! Shared plumbing for the skillcast crates: error context helpers and named
//! filesystem probes.

pub mod error;
pub mod fsx;

pub use error::FromMessage;
