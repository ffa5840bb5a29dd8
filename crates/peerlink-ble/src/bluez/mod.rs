//! BlueZ platform adapter
//!
//! Serves the bridge service as a BlueZ GATT application through `bluer`,
//! advertises it, watches link state, and connects back to new remotes with
//! `btleplug` in central mode. Every bluer request closure is turned into a
//! dispatcher callback and then waits for the dispatcher's answer.

mod link;
mod server;
mod sink;
mod watcher;

pub use link::BtleplugLinkOpener;
pub use server::BluezBridge;
pub use sink::ChannelResponseSink;

use crate::error::BridgeError;

fn platform_error(context: &str, error: impl std::fmt::Display) -> BridgeError {
    BridgeError::Platform(format!("{}: {}", context, error))
}
