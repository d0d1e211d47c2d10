//! Shared handler state.

use biogate_core::{ApiKey, ServiceConfig};
use biogate_device::{DeviceService, DeviceStatusCache, RealtimeEventBridge};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::hub::{BroadcastHub, HubMessage};

/// Everything a handler can reach. Cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub service: DeviceService,
    pub realtime: RealtimeEventBridge,
    pub status: DeviceStatusCache,
    pub hub: BroadcastHub<HubMessage>,
    pub api_key: ApiKey,

    /// Subscription lifetime when the client does not ask for one
    pub realtime_timeout: Duration,

    /// Cancelled when the process begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        service: DeviceService,
        status: DeviceStatusCache,
        hub: BroadcastHub<HubMessage>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            realtime: RealtimeEventBridge::new(service.clone()),
            service,
            status,
            hub,
            api_key: config.api_key.clone(),
            realtime_timeout: config.realtime_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie websocket sessions to an externally owned shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
