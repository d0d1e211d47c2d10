//! Periodic reachability checks.
//!
//! [`StatusPoller`] probes every known terminal on a fixed interval by
//! fetching its device info through the normal bracket, and writes the
//! outcome to a shared [`DeviceStatusCache`]. A terminal that is busy with
//! another operation is skipped for that cycle and keeps its previous entry.
//!
//! Every change of a terminal's health (including its first observation)
//! is published as a [`StatusChange`].

use crate::service::DeviceService;
use biogate_core::{DeviceAddress, DeviceInfo};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHANGE_BUFFER: usize = 64;

/// Message reported before any poll cycle has produced a result.
pub const NO_CHECKS_MESSAGE: &str = "No devices have been checked yet";

/// Coarse health of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Online,
    Offline,
}

/// Outcome of the last probe of one terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeviceHealth {
    Online { info: DeviceInfo },
    Offline { error: String },
}

/// Cache entry for one terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub health: DeviceHealth,

    /// When the probe finished
    pub timestamp: DateTime<Utc>,
}

impl DeviceStatus {
    #[must_use]
    pub fn state(&self) -> HealthState {
        match self.health {
            DeviceHealth::Online { .. } => HealthState::Online,
            DeviceHealth::Offline { .. } => HealthState::Offline,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state() == HealthState::Online
    }
}

/// Published whenever a terminal's health changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub device: DeviceAddress,

    /// `None` on the first observation
    pub previous: Option<HealthState>,

    pub current: HealthState,

    pub status: DeviceStatus,
}

/// Last known status of every probed terminal.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatusCache {
    entries: Arc<RwLock<HashMap<DeviceAddress, DeviceStatus>>>,
}

impl DeviceStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `status` for `address`, returning the previous entry.
    pub async fn record(&self, address: DeviceAddress, status: DeviceStatus) -> Option<DeviceStatus> {
        self.entries.write().await.insert(address, status)
    }

    pub async fn get(&self, address: &DeviceAddress) -> Option<DeviceStatus> {
        self.entries.read().await.get(address).cloned()
    }

    /// Consistent copy of every entry.
    pub async fn snapshot(&self) -> HashMap<DeviceAddress, DeviceStatus> {
        self.entries.read().await.clone()
    }

    pub async fn summary(&self) -> HealthSummary {
        HealthSummary::from_snapshot(&self.snapshot().await, Utc::now())
    }
}

/// Per-terminal line of a [`HealthSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceHealthDetail {
    pub status: HealthState,

    /// Seconds since the terminal was last probed, to one decimal
    pub last_update_seconds: f64,
}

/// Aggregate view of the status cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HealthSummary {
    /// No probe has finished yet
    NoChecksYet { message: String },

    Report {
        total: usize,
        online: usize,
        offline: usize,
        details: BTreeMap<String, DeviceHealthDetail>,
    },
}

impl HealthSummary {
    /// Summarize `snapshot` as seen at `now`.
    ///
    /// # Examples
    ///
    /// ```
    /// use biogate_device::monitor::HealthSummary;
    /// use chrono::Utc;
    /// use std::collections::HashMap;
    ///
    /// let summary = HealthSummary::from_snapshot(&HashMap::new(), Utc::now());
    /// assert!(matches!(summary, HealthSummary::NoChecksYet { .. }));
    /// ```
    #[must_use]
    pub fn from_snapshot(
        snapshot: &HashMap<DeviceAddress, DeviceStatus>,
        now: DateTime<Utc>,
    ) -> Self {
        if snapshot.is_empty() {
            return Self::NoChecksYet {
                message: NO_CHECKS_MESSAGE.to_string(),
            };
        }

        let details: BTreeMap<String, DeviceHealthDetail> = snapshot
            .iter()
            .map(|(address, status)| {
                let age = (now - status.timestamp).num_milliseconds().max(0);
                (
                    address.to_string(),
                    DeviceHealthDetail {
                        status: status.state(),
                        last_update_seconds: (age as f64 / 100.0).round() / 10.0,
                    },
                )
            })
            .collect();
        let online = details
            .values()
            .filter(|d| d.status == HealthState::Online)
            .count();

        Self::Report {
            total: details.len(),
            online,
            offline: details.len() - online,
            details,
        }
    }
}

/// Outcome of probing one terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Online,
    Offline,
    /// Another operation held the terminal
    Skipped,
}

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub online: usize,
    pub offline: usize,
    pub skipped: usize,
}

/// Probes known terminals on a fixed interval.
pub struct StatusPoller {
    service: DeviceService,
    cache: DeviceStatusCache,
    devices: Vec<DeviceAddress>,
    interval: Duration,
    changes: broadcast::Sender<StatusChange>,
}

impl StatusPoller {
    pub fn new(
        service: DeviceService,
        cache: DeviceStatusCache,
        devices: Vec<DeviceAddress>,
        interval: Duration,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            service,
            cache,
            devices,
            interval,
            changes,
        }
    }

    /// Receive every [`StatusChange`] published after this call.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Poll until `cancel` fires.
    ///
    /// The first cycle starts immediately; later cycles start `interval`
    /// after the previous one finished.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            devices = self.devices.len(),
            interval_secs = self.interval.as_secs(),
            "Status poller started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_cycle() => {
                    debug!(
                        online = report.online,
                        offline = report.offline,
                        skipped = report.skipped,
                        "Status poll cycle finished"
                    );
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Status poller stopped");
    }

    /// Probe every known terminal once, concurrently.
    pub async fn run_cycle(&self) -> CycleReport {
        let outcomes = join_all(self.devices.iter().map(|address| self.probe(address))).await;

        let mut report = CycleReport::default();
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Online => report.online += 1,
                ProbeOutcome::Offline => report.offline += 1,
                ProbeOutcome::Skipped => report.skipped += 1,
            }
        }
        report
    }

    /// Probe one terminal and record the result.
    pub async fn probe(&self, address: &DeviceAddress) -> ProbeOutcome {
        let health = match self.service.try_get_device_info(address).await {
            None => {
                debug!(device = %address, "Device busy, skipping status check");
                return ProbeOutcome::Skipped;
            }
            Some(Ok(info)) => DeviceHealth::Online { info },
            Some(Err(e)) => {
                warn!(device = %address, error = %e, "Status check failed");
                DeviceHealth::Offline {
                    error: e.to_string(),
                }
            }
        };

        let status = DeviceStatus {
            health,
            timestamp: Utc::now(),
        };
        let current = status.state();
        let previous = self
            .cache
            .record(address.clone(), status.clone())
            .await
            .map(|s| s.state());

        if previous != Some(current) {
            info!(device = %address, previous = ?previous, current = ?current, "Device status changed");
            // No subscribers is fine
            let _ = self.changes.send(StatusChange {
                device: address.clone(),
                previous,
                current,
                status,
            });
        }

        match current {
            HealthState::Online => ProbeOutcome::Online,
            HealthState::Offline => ProbeOutcome::Offline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn status(online: bool, timestamp: DateTime<Utc>) -> DeviceStatus {
        let health = if online {
            DeviceHealth::Online {
                info: DeviceInfo {
                    firmware_version: "Ver 6.60".to_string(),
                    device_name: "K40".to_string(),
                    serial_number: "S1".to_string(),
                    mac_address: "00:17:61:00:00:01".to_string(),
                    platform: "ZEM600_TFT".to_string(),
                    device_time: "2025-03-01 08:15:00".to_string(),
                },
            }
        } else {
            DeviceHealth::Offline {
                error: "timed out".to_string(),
            }
        };
        DeviceStatus { health, timestamp }
    }

    #[test]
    fn test_summary_counts_and_ages() {
        let now = Utc::now();
        let snapshot = HashMap::from([
            ("10.0.0.7".parse().unwrap(), status(true, now - TimeDelta::seconds(3))),
            ("10.0.0.8".parse().unwrap(), status(false, now - TimeDelta::milliseconds(1500))),
            ("10.0.0.9".parse().unwrap(), status(true, now)),
        ]);

        let HealthSummary::Report {
            total,
            online,
            offline,
            details,
        } = HealthSummary::from_snapshot(&snapshot, now)
        else {
            panic!("expected a report");
        };

        assert_eq!((total, online, offline), (3, 2, 1));
        assert_eq!(details["10.0.0.7"].last_update_seconds, 3.0);
        assert_eq!(details["10.0.0.8"].last_update_seconds, 1.5);
        assert_eq!(details["10.0.0.8"].status, HealthState::Offline);
    }

    #[test]
    fn test_summary_json_shapes() {
        let empty = serde_json::to_value(HealthSummary::from_snapshot(&HashMap::new(), Utc::now()))
            .unwrap();
        assert_eq!(empty, serde_json::json!({ "message": NO_CHECKS_MESSAGE }));

        let now = Utc::now();
        let snapshot = HashMap::from([("10.0.0.7".parse().unwrap(), status(false, now))]);
        let report = serde_json::to_value(HealthSummary::from_snapshot(&snapshot, now)).unwrap();
        assert_eq!(report["total"], 1);
        assert_eq!(report["offline"], 1);
        assert_eq!(report["details"]["10.0.0.7"]["status"], "offline");
        assert_eq!(report["details"]["10.0.0.7"]["last_update_seconds"], 0.0);
    }

    #[test]
    fn test_status_json_shape() {
        let value = serde_json::to_value(status(false, Utc::now())).unwrap();
        assert_eq!(value["status"], "offline");
        assert_eq!(value["error"], "timed out");
        assert!(value["timestamp"].is_string());

        let value = serde_json::to_value(status(true, Utc::now())).unwrap();
        assert_eq!(value["status"], "online");
        assert_eq!(value["info"]["platform"], "ZEM600_TFT");
    }

    #[tokio::test]
    async fn test_cache_record_returns_previous() {
        let cache = DeviceStatusCache::new();
        let address: DeviceAddress = "10.0.0.7".parse().unwrap();

        assert!(cache.record(address.clone(), status(true, Utc::now())).await.is_none());
        let previous = cache.record(address.clone(), status(false, Utc::now())).await;

        assert_eq!(previous.map(|s| s.state()), Some(HealthState::Online));
        assert!(!cache.get(&address).await.unwrap().is_online());
        assert_eq!(cache.snapshot().await.len(), 1);
    }
}
