//! Shardload Common Library
//!
//! Shared error handling and logging for the shardload workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`Error`] and the [`Result`] alias used by config loading
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use shardload_common::logging::{init_logging, LogConfig};
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

pub use error::{Error, Result};
