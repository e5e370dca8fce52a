use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::link::LinkOptions;

/// Runtime settings, loadable from a TOML file with CLI overrides applied
/// on top. Every field has a sane default so no file is required.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Serial device path; host mode falls back to auto-discovery when
    /// unset.
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout_ms: u64,
    pub telemetry_period_secs: u64,
    pub heartbeat_period_secs: u64,
    pub liveness_timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub queue_depth: usize,
    pub probe_window_secs: u64,
    pub allow_shutdown: bool,
    pub suppress_unchanged: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            read_timeout_ms: 100,
            telemetry_period_secs: 10,
            heartbeat_period_secs: 5,
            liveness_timeout_secs: 15,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            queue_depth: 32,
            probe_window_secs: 3,
            allow_shutdown: false,
            suppress_unchanged: false,
        }
    }
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Liveness must outlast a couple of missed beats or the link flaps
    /// under ordinary jitter.
    pub fn validate(&self) -> Result<()> {
        if self.liveness_timeout_secs < self.heartbeat_period_secs * 2 {
            bail!(
                "liveness_timeout_secs ({}) must be at least twice heartbeat_period_secs ({})",
                self.liveness_timeout_secs,
                self.heartbeat_period_secs
            );
        }
        if self.queue_depth == 0 {
            bail!("queue_depth must be at least 1");
        }
        if self.read_timeout_ms == 0 || self.read_timeout_ms > 1_000 {
            bail!("read_timeout_ms must be within 1..=1000");
        }
        Ok(())
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            liveness_timeout: Duration::from_secs(self.liveness_timeout_secs),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            queue_depth: self.queue_depth,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_secs(self.telemetry_period_secs)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn probe_window(&self) -> Duration {
        Duration::from_secs(self.probe_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let cfg = BridgeConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.liveness_timeout() >= cfg.heartbeat_period() * 2);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let cfg: BridgeConfig =
            toml::from_str("port = \"/dev/ttyUSB0\"\ntelemetry_period_secs = 5\n").unwrap();
        assert_eq!(cfg.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cfg.telemetry_period_secs, 5);
        assert_eq!(cfg.baud, 115_200);
    }

    #[test]
    fn flappy_timing_rejected() {
        let cfg: BridgeConfig =
            toml::from_str("heartbeat_period_secs = 10\nliveness_timeout_secs = 12\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<BridgeConfig>("bogus_knob = true\n").is_err());
    }
}
