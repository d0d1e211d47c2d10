//! Command line and environment surface.

use anyhow::{Context, Result};
use biogate_core::config::parse_device_list;
use biogate_core::constants::{
    DEFAULT_BACKOFF_UNIT_MS, DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_DEVICE_PASSWORD,
    DEFAULT_DEVICE_PORT, DEFAULT_DEVICE_TIMEOUT_SECS, DEFAULT_MAX_WORKERS,
    DEFAULT_REALTIME_TIMEOUT_SECS, DEFAULT_RECONNECT_ATTEMPTS,
};
use biogate_core::ServiceConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "biogate")]
#[command(version, about = "HTTP gateway for biometric attendance terminals", long_about = None)]
pub struct Args {
    /// Address the HTTP server listens on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Port used for terminal addresses that do not carry one
    #[arg(long, env = "DEVICE_PORT", default_value_t = DEFAULT_DEVICE_PORT)]
    pub device_port: u16,

    /// Per-attempt connect timeout, in seconds
    #[arg(long, env = "DEVICE_TIMEOUT", default_value_t = DEFAULT_DEVICE_TIMEOUT_SECS)]
    pub device_timeout: u64,

    /// Terminal communication password
    #[arg(long, env = "DEVICE_PASSWORD", default_value = DEFAULT_DEVICE_PASSWORD, hide_env_values = true)]
    pub device_password: String,

    /// Workers available for blocking terminal calls
    #[arg(long, env = "MAX_WORKERS", default_value_t = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,

    /// Seconds between status poll cycles
    #[arg(long, env = "DEVICE_CHECK_INTERVAL", default_value_t = DEFAULT_CHECK_INTERVAL_SECS)]
    pub check_interval: u64,

    /// Connect attempts before a terminal is reported unavailable
    #[arg(long, env = "RECONNECT_ATTEMPTS", default_value_t = DEFAULT_RECONNECT_ATTEMPTS)]
    pub reconnect_attempts: u32,

    /// Base unit of the exponential connect backoff, in milliseconds
    #[arg(long, env = "BACKOFF_UNIT_MS", default_value_t = DEFAULT_BACKOFF_UNIT_MS)]
    pub backoff_ms: u64,

    /// Comma separated terminals to poll
    #[arg(long, env = "KNOWN_DEVICES", default_value = "")]
    pub known_devices: String,

    /// Shared secret expected in the X-API-Key header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Default lifetime of a realtime subscription, in seconds
    #[arg(long, env = "REALTIME_TIMEOUT", default_value_t = DEFAULT_REALTIME_TIMEOUT_SECS)]
    pub realtime_timeout: u64,

    /// Verbose logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Serve in-memory simulated terminals for every known device
    #[arg(long, env = "SIMULATE")]
    pub simulate: bool,

    /// Seconds between generated punches in simulation mode
    #[arg(long, default_value_t = 15)]
    pub punch_interval: u64,
}

impl Args {
    /// Turn the parsed flags into a validated configuration.
    pub fn to_config(&self) -> Result<ServiceConfig> {
        let known_devices =
            parse_device_list(&self.known_devices).context("invalid KNOWN_DEVICES")?;

        let mut config = ServiceConfig::default()
            .bind_addr(self.bind_addr)
            .device_port(self.device_port)
            .device_timeout(Duration::from_secs(self.device_timeout))
            .device_password(self.device_password.clone())
            .max_workers(self.max_workers)
            .check_interval(Duration::from_secs(self.check_interval))
            .reconnect_attempts(self.reconnect_attempts)
            .backoff_unit(Duration::from_millis(self.backoff_ms))
            .known_devices(known_devices)
            .realtime_timeout(Duration::from_secs(self.realtime_timeout))
            .debug(self.debug);
        if let Some(key) = &self.api_key {
            config = config.api_key(key.clone());
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    pub fn punch_interval(&self) -> Duration {
        Duration::from_secs(self.punch_interval.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(extra: &[&str]) -> Args {
        let argv = std::iter::once("biogate").chain(extra.iter().copied());
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_service_defaults() {
        let config = parse(&[]).to_config().unwrap();
        let defaults = ServiceConfig::default();

        assert_eq!(config.bind_addr, defaults.bind_addr);
        assert_eq!(config.device_port, defaults.device_port);
        assert_eq!(config.device_timeout, defaults.device_timeout);
        assert_eq!(config.max_workers, defaults.max_workers);
        assert_eq!(config.check_interval, defaults.check_interval);
        assert_eq!(config.backoff_unit, defaults.backoff_unit);
        assert_eq!(config.realtime_timeout, defaults.realtime_timeout);
        assert!(config.known_devices.is_empty());
        assert!(config.api_key.verify(biogate_core::constants::DEFAULT_API_KEY));
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--known-devices",
            "10.0.0.7, 10.0.0.8:5005,",
            "--max-workers",
            "4",
            "--api-key",
            "s3cret",
            "--debug",
        ])
        .to_config()
        .unwrap();

        assert_eq!(config.known_devices.len(), 2);
        assert_eq!(config.known_devices[1].port(), Some(5005));
        assert_eq!(config.max_workers, 4);
        assert!(config.api_key.verify("s3cret"));
        assert!(config.debug);
    }

    #[rstest]
    #[case(&["--max-workers", "0"])]
    #[case(&["--reconnect-attempts", "0"])]
    #[case(&["--check-interval", "0"])]
    #[case(&["--known-devices", "10.0.0.7:99999"])]
    fn test_invalid_settings_are_rejected(#[case] extra: &[&str]) {
        assert!(parse(extra).to_config().is_err());
    }

    #[test]
    fn test_non_numeric_port_fails_to_parse() {
        assert!(Args::try_parse_from(["biogate", "--device-port", "http"]).is_err());
    }
}
