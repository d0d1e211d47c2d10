//! Shared fixtures for device integration tests.

#![allow(dead_code)]

use biogate_core::{DeviceAddress, ServiceConfig};
use biogate_device::DeviceService;
use biogate_device::mock::{SimulatedConnector, TerminalHandle};
use std::sync::Arc;
use std::time::Duration;

/// Configuration with millisecond backoff so retry tests stay fast.
pub fn fast_config() -> ServiceConfig {
    ServiceConfig::default()
        .device_timeout(Duration::from_millis(50))
        .backoff_unit(Duration::from_millis(1))
        .reconnect_attempts(3)
        .max_workers(8)
}

/// A service over simulated terminals at `hosts`, each seeded with demo data.
pub fn service_with(hosts: &[&str]) -> (DeviceService, SimulatedConnector) {
    service_with_config(hosts, &fast_config())
}

pub fn service_with_config(
    hosts: &[&str],
    config: &ServiceConfig,
) -> (DeviceService, SimulatedConnector) {
    let connector = SimulatedConnector::new();
    for host in hosts {
        connector.add_terminal(host).seed_demo();
    }
    let service = DeviceService::new(Arc::new(connector.clone()), config);
    (service, connector)
}

pub fn terminal(connector: &SimulatedConnector, host: &str) -> TerminalHandle {
    connector.terminal(host).expect("terminal exists")
}

pub fn addr(s: &str) -> DeviceAddress {
    s.parse().expect("valid address")
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
