//! CLI for the flashctl orchestrator.

mod commands;
mod render;

use anyhow::Result;
use clap::{Parser, Subcommand};
use flashctl_core::config;
use flashctl_core::job::{DeviceBrand, FlashMethod, FlashRequest, PartitionImage};
use flashctl_core::Confirmation;
use std::path::PathBuf;

use commands::{run_capabilities, run_config, run_flash, run_stages, run_watch};

/// Top-level CLI for flashctl.
#[derive(Debug, Parser)]
#[command(name = "flashctl")]
#[command(about = "flashctl: drive and watch device flashing jobs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Start a flash job and follow it until it finishes. Ctrl-C cancels the job.
    Flash {
        /// Device serial number.
        #[arg(long)]
        serial: String,
        /// Device brand (samsung, google, xiaomi, ...).
        #[arg(long)]
        brand: DeviceBrand,
        /// Flashing method (fastboot, odin, edl, dfu, sp-flash, adb-sideload, recovery).
        #[arg(long)]
        method: FlashMethod,
        /// Partition to write, optionally with its image. Repeatable.
        #[arg(long = "partition", value_name = "NAME[=IMAGE]", required = true, value_parser = parse_partition)]
        partitions: Vec<PartitionImage>,
        /// Ask the backend to verify partitions after writing.
        #[arg(long)]
        verify: bool,
        /// Reboot the device when done.
        #[arg(long)]
        reboot: bool,
        /// Wipe user data as part of the job.
        #[arg(long)]
        wipe_data: bool,
        /// Return only once the backend has acknowledged the start.
        #[arg(long)]
        wait_ack: bool,
        /// Override the configured backend endpoint.
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
    },

    /// Connect and print every job update, including jobs started elsewhere.
    Watch {
        /// Override the configured backend endpoint.
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
    },

    /// Show the builtin capability entry for a brand.
    Capabilities {
        /// Device brand.
        brand: DeviceBrand,
    },

    /// Show the pipeline stages for a method.
    Stages {
        /// Flashing method.
        method: FlashMethod,
        /// Partitions, for methods with one stage per partition.
        #[arg(long = "partition", value_name = "NAME")]
        partitions: Vec<String>,
    },

    /// Print the config file path and effective values.
    Config,
}

/// `boot` or `boot=/path/to/boot.img`.
fn parse_partition(arg: &str) -> Result<PartitionImage, String> {
    let (name, image) = match arg.split_once('=') {
        Some((name, image)) => (name.trim(), Some(image.trim())),
        None => (arg.trim(), None),
    };
    if name.is_empty() {
        return Err(format!("missing partition name in '{arg}'"));
    }
    let mut partition = PartitionImage::named(name);
    if let Some(image) = image {
        if image.is_empty() {
            return Err(format!("empty image path for partition '{name}'"));
        }
        partition.image_path = Some(PathBuf::from(image));
    }
    Ok(partition)
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Flash {
                serial,
                brand,
                method,
                partitions,
                verify,
                reboot,
                wipe_data,
                wait_ack,
                endpoint,
            } => {
                let mut cfg = config::load_or_init()?;
                if let Some(endpoint) = endpoint {
                    cfg.endpoint = endpoint;
                }
                tracing::debug!("loaded config: {:?}", cfg);
                let request = FlashRequest {
                    device_serial: serial,
                    device_brand: brand,
                    flash_method: method,
                    partitions,
                    verify_after_flash: verify,
                    auto_reboot: reboot,
                    wipe_user_data: wipe_data,
                };
                let confirm = if wait_ack {
                    Confirmation::Acknowledged
                } else {
                    Confirmation::Optimistic
                };
                run_flash(cfg, request, confirm).await?;
            }
            CliCommand::Watch { endpoint } => {
                let mut cfg = config::load_or_init()?;
                if let Some(endpoint) = endpoint {
                    cfg.endpoint = endpoint;
                }
                run_watch(cfg).await?;
            }
            CliCommand::Capabilities { brand } => run_capabilities(brand)?,
            CliCommand::Stages { method, partitions } => run_stages(method, &partitions),
            CliCommand::Config => run_config()?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
