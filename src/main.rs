use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use uart_bridge::cli::{Cli, Cmd};
use uart_bridge::link::discovery;
use uart_bridge::{device, host};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Cli::parse();
    match args.cmd {
        Cmd::Host(opts) => host::run(opts),
        Cmd::Device(opts) => device::run(opts),
        Cmd::Probe(opts) => {
            let cfg = opts.ser.resolve()?;
            let dev = discovery::discover(cfg.baud, cfg.read_timeout(), cfg.probe_window())?;
            println!("{dev}");
            Ok(())
        }
    }
}
