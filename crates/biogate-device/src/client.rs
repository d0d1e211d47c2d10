//! Protocol client seam.
//!
//! Terminals speak a proprietary binary protocol through a blocking client
//! library. This module defines the two traits the rest of the crate talks
//! to:
//!
//! - [`DeviceConnector`] opens a connection and hands back a client.
//! - [`DeviceProtocolClient`] is one open connection.
//!
//! Every method blocks the calling thread, so callers must run them on the
//! [`WorkerPool`](crate::WorkerPool) and never on an async executor thread.
//!
//! The raw types below mirror what a client reports before translation into
//! the public entities in `biogate_core`.

use crate::error::ClientResult;
use biogate_core::{
    AttendanceRecord, DeviceCredential, DeviceInfo, LiveEvent, Privilege, User, UserTemplate,
};
use chrono::NaiveDateTime;
use std::time::Duration;

/// Format used when reporting a terminal's clock.
pub const DEVICE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything a connector needs to dial a terminal.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Host or IP literal
    pub host: String,

    /// Port to dial
    pub port: u16,

    /// Per-attempt timeout
    pub timeout: Duration,

    /// Communication password
    pub credential: DeviceCredential,

    /// Ask the client library for verbose diagnostics
    pub verbose: bool,
}

/// Opens connections to terminals.
pub trait DeviceConnector: Send + Sync + 'static {
    /// Open a connection. Blocks for at most `params.timeout`.
    ///
    /// # Errors
    /// Connectivity-class errors (see
    /// [`ClientError::is_connectivity`](crate::ClientError::is_connectivity))
    /// are retried by the session; anything else fails the attempt
    /// immediately.
    fn connect(&self, params: &ConnectParams) -> ClientResult<Box<dyn DeviceProtocolClient>>;
}

/// One open connection to a terminal.
pub trait DeviceProtocolClient: Send {
    /// Close the connection.
    fn disconnect(&mut self) -> ClientResult<()>;

    /// Lock the terminal's keypad and sensor.
    fn disable_device(&mut self) -> ClientResult<()>;

    /// Unlock the terminal's keypad and sensor.
    fn enable_device(&mut self) -> ClientResult<()>;

    fn get_users(&mut self) -> ClientResult<Vec<RawUser>>;

    fn get_attendance(&mut self) -> ClientResult<Vec<RawAttendance>>;

    fn get_device_info(&mut self) -> ClientResult<RawDeviceInfo>;

    /// Play a stored voice prompt.
    fn test_voice(&mut self, index: u8) -> ClientResult<()>;

    /// Wait up to `wait` for the next pushed punch.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn next_live_event(&mut self, wait: Duration) -> ClientResult<Option<RawAttendance>>;

    /// Store fingerprint templates on the terminal.
    fn save_user_templates(&mut self, templates: &[UserTemplate]) -> ClientResult<()>;
}

/// A user as reported by a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUser {
    pub uid: u16,
    pub user_id: String,
    pub name: String,
    pub privilege: u8,
    pub password: String,
    pub group_id: String,
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        Self {
            uid: raw.uid,
            user_id: raw.user_id,
            name: raw.name,
            privilege: Privilege::from_raw(raw.privilege),
            password: raw.password,
            group_id: raw.group_id,
        }
    }
}

/// A punch as reported by a terminal, stored or live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttendance {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub status: u8,
    pub punch: u8,
}

impl RawAttendance {
    /// Tag a live punch with the host that pushed it.
    #[must_use]
    pub fn into_live_event(self, device_ip: &str) -> LiveEvent {
        LiveEvent {
            user_id: self.user_id,
            timestamp: self.timestamp,
            status: self.status,
            punch: self.punch,
            device_ip: device_ip.to_string(),
        }
    }
}

impl From<RawAttendance> for AttendanceRecord {
    fn from(raw: RawAttendance) -> Self {
        Self {
            user_id: raw.user_id,
            timestamp: raw.timestamp,
            status: raw.status,
            punch: raw.punch,
        }
    }
}

/// Terminal identity and clock as reported by a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceInfo {
    pub firmware_version: String,
    pub device_name: String,
    pub serial_number: String,
    pub mac_address: String,
    pub platform: String,
    pub device_time: NaiveDateTime,
}

impl From<RawDeviceInfo> for DeviceInfo {
    fn from(raw: RawDeviceInfo) -> Self {
        Self {
            firmware_version: raw.firmware_version,
            device_name: raw.device_name,
            serial_number: raw.serial_number,
            mac_address: raw.mac_address,
            platform: raw.platform,
            device_time: raw.device_time.format(DEVICE_TIME_FORMAT).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, DEVICE_TIME_FORMAT).unwrap()
    }

    #[test]
    fn test_raw_user_privilege_mapping() {
        let raw = RawUser {
            uid: 1,
            user_id: "1001".to_string(),
            name: "Ana".to_string(),
            privilege: 14,
            password: String::new(),
            group_id: "1".to_string(),
        };
        let user = User::from(raw.clone());
        assert_eq!(user.privilege, Privilege::Admin);
        assert_eq!(user.user_id, "1001");

        let user = User::from(RawUser { privilege: 0, ..raw });
        assert_eq!(user.privilege, Privilege::User);
    }

    #[test]
    fn test_device_time_formatting() {
        let info = DeviceInfo::from(RawDeviceInfo {
            firmware_version: "Ver 6.60".to_string(),
            device_name: "K40".to_string(),
            serial_number: "S1".to_string(),
            mac_address: "00:17:61:00:00:01".to_string(),
            platform: "ZEM600_TFT".to_string(),
            device_time: at("2025-03-01 08:15:00"),
        });
        assert_eq!(info.device_time, "2025-03-01 08:15:00");
    }

    #[test]
    fn test_live_event_tagging() {
        let raw = RawAttendance {
            user_id: "7".to_string(),
            timestamp: at("2025-03-01 08:15:00"),
            status: 1,
            punch: 0,
        };
        let event = raw.clone().into_live_event("10.0.0.7");
        assert_eq!(event.device_ip, "10.0.0.7");
        assert_eq!(event.user_id, "7");

        let record = AttendanceRecord::from(raw);
        assert_eq!(record.timestamp, event.timestamp);
    }
}
