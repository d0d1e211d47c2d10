//! Simulation mode: in-memory terminals with periodic punches.

use biogate_core::DeviceAddress;
use biogate_device::mock::SimulatedConnector;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Users seeded by `TerminalHandle::seed_demo`.
const DEMO_USERS: [&str; 3] = ["1001", "1002", "1003"];

/// Punches left unread on a terminal before the generator stops adding more.
const MAX_PENDING_PUNCHES: usize = 32;

/// One seeded terminal per known device.
pub fn connector(devices: &[DeviceAddress]) -> SimulatedConnector {
    let connector = SimulatedConnector::new();
    for device in devices {
        connector.add_terminal(device.host()).seed_demo();
        info!(device = %device, "Simulated terminal ready");
    }
    connector
}

/// Punch a rotating demo user on every terminal each `interval`.
pub async fn generate_punches(
    connector: SimulatedConnector,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;

    let mut round = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let user_id = DEMO_USERS[round % DEMO_USERS.len()];
        for host in connector.hosts() {
            let Some(terminal) = connector.terminal(&host) else {
                continue;
            };
            if terminal.pending_live_events() < MAX_PENDING_PUNCHES {
                terminal.punch(user_id);
                debug!(device = %host, user_id, "Simulated punch");
            }
        }
        round += 1;
    }
    debug!("Punch generator stopped");
}
