use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::BridgeConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "uart-bridge", about = "Serial bridge between an embedded panel and a host service")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Run the host-side service (command dispatch + telemetry)
    Host(HostOpts),
    /// Run the device-side endpoint (display + command input)
    Device(DeviceOpts),
    /// Probe serial ports for a speaking peer and print the winner
    Probe(ProbeOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path; host mode auto-discovers when omitted
    #[arg(long)]
    pub dev: Option<String>,
    /// Baud rate
    #[arg(long)]
    pub baud: Option<u32>,
    /// TOML config file; CLI flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct HostOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Permit the SHUTDOWN action to actually power off this machine
    #[arg(long, default_value_t = false)]
    pub allow_shutdown: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DeviceOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
}

impl SerialOpts {
    /// Config file (or defaults) with CLI flags layered on top.
    pub fn resolve(&self) -> Result<BridgeConfig> {
        let mut cfg = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(dev) = &self.dev {
            cfg.port = Some(dev.clone());
        }
        if let Some(baud) = self.baud {
            cfg.baud = baud;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
