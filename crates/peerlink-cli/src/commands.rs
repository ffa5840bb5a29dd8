//! Command handlers for the peerlink CLI

use std::time::Duration;

use tracing::info;

use peerlink_ble::build_service;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::simulate;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Layout => Self::handle_layout_command(&config),
            Commands::Simulate { ready_timeout_ms } => {
                Self::handle_simulate_command(&config, Duration::from_millis(ready_timeout_ms)).await
            }
            Commands::Serve { name } => Self::handle_serve_command(config, name).await,
        }
    }

    /// Print the service layout the bridge registers
    fn handle_layout_command(config: &AppConfig) -> Result<()> {
        let service = build_service(&config.advertisement()?)?;
        println!("{}", serde_json::to_string_pretty(&service)?);
        Ok(())
    }

    async fn handle_simulate_command(config: &AppConfig, ready_timeout: Duration) -> Result<()> {
        info!("Running bridge simulation");
        let report = simulate::run(&config.advertisement()?, &config.bridge, ready_timeout).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);

        if report.failed > 0 {
            return Err(CliError::Simulation(format!(
                "{} of {} scenarios failed",
                report.failed,
                report.scenarios.len()
            )));
        }
        Ok(())
    }

    #[cfg(all(target_os = "linux", feature = "bluez"))]
    async fn handle_serve_command(config: AppConfig, name: Option<String>) -> Result<()> {
        use std::sync::Arc;

        use peerlink_ble::bluez::BluezBridge;

        use crate::logging_core::LoggingCore;

        let service = build_service(&config.advertisement()?)?;
        let bridge = BluezBridge::start(service, Arc::new(LoggingCore), config.bridge, name).await?;
        info!("Serving on {}, press Ctrl-C to stop", bridge.adapter_name());

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        drop(bridge);
        Ok(())
    }

    #[cfg(not(all(target_os = "linux", feature = "bluez")))]
    async fn handle_serve_command(_config: AppConfig, _name: Option<String>) -> Result<()> {
        Err(CliError::FeatureNotAvailable(
            "serve needs Linux and the `bluez` feature".to_string(),
        ))
    }
}
