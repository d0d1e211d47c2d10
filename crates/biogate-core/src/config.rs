//! Service configuration.
//!
//! [`ServiceConfig`] carries every knob the gateway exposes and is built
//! fluently. The binary fills it from flags, each of which falls back to the
//! environment key below.
//!
//! | Key | Default |
//! |-----|---------|
//! | `DEVICE_PORT` | 4370 |
//! | `DEVICE_TIMEOUT` | 5 (seconds) |
//! | `DEVICE_PASSWORD` | `0` |
//! | `MAX_WORKERS` | 10 |
//! | `DEVICE_CHECK_INTERVAL` | 60 (seconds) |
//! | `RECONNECT_ATTEMPTS` | 3 |
//! | `KNOWN_DEVICES` | empty (comma separated) |
//! | `DEBUG` | false |
//! | `API_KEY` | `default-secret-key` |
//! | `REALTIME_TIMEOUT` | 300 (seconds) |
//! | `BIND_ADDR` | `0.0.0.0:8000` |

use crate::constants::*;
use crate::types::{ApiKey, DeviceAddress, DeviceCredential};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Port used for addresses that do not carry one
    pub device_port: u16,

    /// Timeout for a single connect attempt
    pub device_timeout: Duration,

    /// Password used when a request does not override it
    pub device_password: DeviceCredential,

    /// Number of workers available for blocking device calls
    pub max_workers: usize,

    /// Period between status poll cycles
    pub check_interval: Duration,

    /// Connect attempts before a session reports failure
    pub reconnect_attempts: u32,

    /// Base unit of the exponential connect backoff
    pub backoff_unit: Duration,

    /// Terminals probed by the status poller
    pub known_devices: Vec<DeviceAddress>,

    /// Verbose logging and verbose protocol clients
    pub debug: bool,

    /// Shared secret for the HTTP surface
    pub api_key: ApiKey,

    /// Default lifetime of a realtime subscription
    pub realtime_timeout: Duration,

    /// HTTP listen address
    pub bind_addr: SocketAddr,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            device_port: DEFAULT_DEVICE_PORT,
            device_timeout: Duration::from_secs(DEFAULT_DEVICE_TIMEOUT_SECS),
            device_password: DeviceCredential::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            backoff_unit: Duration::from_millis(DEFAULT_BACKOFF_UNIT_MS),
            known_devices: Vec::new(),
            debug: false,
            api_key: ApiKey::new(DEFAULT_API_KEY),
            realtime_timeout: Duration::from_secs(DEFAULT_REALTIME_TIMEOUT_SECS),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

impl ServiceConfig {
    /// Reject settings the runtime cannot work with.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("MAX_WORKERS", "must be at least 1"));
        }
        if self.reconnect_attempts == 0 {
            return Err(Error::config("RECONNECT_ATTEMPTS", "must be at least 1"));
        }
        if self.check_interval.is_zero() {
            return Err(Error::config("DEVICE_CHECK_INTERVAL", "must be non-zero"));
        }
        if self.device_timeout.is_zero() {
            return Err(Error::config("DEVICE_TIMEOUT", "must be non-zero"));
        }
        if self.device_port == 0 {
            return Err(Error::config("DEVICE_PORT", "must be non-zero"));
        }
        Ok(())
    }

    pub fn device_port(mut self, port: u16) -> Self {
        self.device_port = port;
        self
    }

    pub fn device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    pub fn device_password(mut self, password: impl Into<String>) -> Self {
        self.device_password = DeviceCredential::new(password);
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn known_devices(mut self, devices: Vec<DeviceAddress>) -> Self {
        self.known_devices = devices;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = ApiKey::new(key);
        self
    }

    pub fn realtime_timeout(mut self, timeout: Duration) -> Self {
        self.realtime_timeout = timeout;
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

/// Parse a comma separated address list, dropping blank entries.
///
/// # Errors
/// Returns `Error::Config` for the first entry that is not an address.
pub fn parse_device_list(raw: &str) -> Result<Vec<DeviceAddress>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|e: Error| Error::config("KNOWN_DEVICES", e.to_string()))
        })
        .collect()
}
