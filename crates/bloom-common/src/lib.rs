//! Bloom Common Library
//!
//! Shared error handling and logging for the Bloom workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`BloomError`] and the [`Result`] alias
//! - **Logging**: centralized `tracing` setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use bloom_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{BloomError, Result};
