// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! stkw: supervisor entrypoint.
//!
//! Loads the fleet document, wires logging (console plus a daily-rotating
//! file under the configured log path), brings up the addon subsystem, and
//! autostarts flagged servers. Runs until interrupted, then stops the
//! fleet with a bounded timeout. Exits non-zero only when initialization
//! itself fails.

use clap::Parser;
use std::path::PathBuf;
use stkw_addons::{catalog, AddonConfig, AddonSync};
use stkw_core::FleetConfig;
use stkw_supervisor::SupervisorFleet;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stkw", about = "Multi-instance SuperTuxKart server supervisor")]
struct Args {
    /// Path to the fleet configuration document
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Path to the addon-updater configuration document
    #[arg(long, default_value = "stkswrapper.toml")]
    addon_config: PathBuf,

    /// Disable the addon subsystem entirely
    #[arg(long)]
    no_addons: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = FleetConfig::load_or_default(&args.config);

    std::fs::create_dir_all(&config.logpath)?;
    let file_appender = tracing_appender::rolling::daily(&config.logpath, "stkserver-wrapper.log");
    let (file_writer, _appender_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    tracing::info!(version = %config.stk_version, "supervisor starting");

    let stk_version = catalog::parse_stk_version(&config.stk_version)?;
    let fleet = SupervisorFleet::new(&args.config, config);

    let _addons = if args.no_addons {
        None
    } else {
        let addon_config = AddonConfig::load_or_default(&args.addon_config);
        let sync = AddonSync::new(
            addon_config,
            &args.addon_config,
            stk_version,
            fleet.restart_condition(),
        );
        sync.scan_installed();
        sync.spawn_autoupdate(&fleet.tasks);
        Some(sync)
    };

    for name in fleet.autostart_names() {
        tracing::info!(server = %name, "autostarting server");
        let worker = fleet.clone();
        let server = name.clone();
        fleet.tasks.spawn(&format!("autostart-{name}"), async move {
            if let Err(err) = worker.start_server(&server).await {
                tracing::error!(server = %server, error = %err, "autostart failed");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, stopping the fleet");
    fleet.cleanup().await;
    Ok(())
}
