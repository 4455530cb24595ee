//! objmirror common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging bootstrap and small utilities used across
//! the objmirror workspace:
//!
//! - **Error Handling**: the [`MirrorError`] type and [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//! - **Checksums**: SHA-256 helpers used for dedup fingerprints and
//!   checksum-based transfer skips
//! - **URLs**: scheme-qualified URL helpers (`mem://bucket/path/...`)

pub mod checksum;
pub mod error;
pub mod logging;
pub mod url;

// Re-export commonly used types
pub use error::{MirrorError, Result};
