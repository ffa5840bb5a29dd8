//! peerlink CLI library
//!
//! Configuration loading, command handling and the in-memory simulator
//! behind the `peerlink` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
#[cfg(all(target_os = "linux", feature = "bluez"))]
pub mod logging_core;
pub mod simulate;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
