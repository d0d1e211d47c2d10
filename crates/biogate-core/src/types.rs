use crate::{
    Result,
    constants::{DEFAULT_DEVICE_PASSWORD, USER_PRIVILEGE_ADMIN},
    error::Error,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;

/// Network address of a terminal: a host and an optional port.
///
/// Used as the key for sessions, locks and the status cache. Accepted
/// forms are `host`, `host:port`, a bare IPv6 literal and `[v6]:port`.
///
/// # Examples
///
/// ```
/// use biogate_core::DeviceAddress;
///
/// let addr: DeviceAddress = "192.168.1.201:4370".parse().unwrap();
/// assert_eq!(addr.host(), "192.168.1.201");
/// assert_eq!(addr.port(), Some(4370));
/// assert_eq!(addr.to_string(), "192.168.1.201:4370");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress {
    host: String,
    port: Option<u16>,
}

impl DeviceAddress {
    /// Create an address from a host and an explicit port.
    ///
    /// # Errors
    /// Returns `Error::InvalidAddress` if the host is empty, contains
    /// characters that cannot appear in a hostname or IP literal, or the
    /// port is zero.
    pub fn with_port(host: &str, port: u16) -> Result<Self> {
        let host = validate_host(host)?;
        if port == 0 {
            return Err(Error::invalid_address(host, "port must be non-zero"));
        }
        Ok(Self {
            host,
            port: Some(port),
        })
    }

    /// Host part (hostname or IP literal, without brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, if the address carried one.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port to dial, falling back to `default` when none was given.
    #[must_use]
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

fn validate_host(host: &str) -> Result<String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::invalid_address(host, "host is empty"));
    }
    if let Some(bad) = host
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%')))
    {
        return Err(Error::invalid_address(
            host,
            format!("unexpected character '{bad}'"),
        ));
    }
    Ok(host.to_string())
}

fn parse_port(input: &str, port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::invalid_address(
            input,
            format!("invalid port '{port}'"),
        )),
        Ok(p) => Ok(p),
    }
}

impl std::str::FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();

        // [v6]:port or [v6]
        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::invalid_address(input, "unterminated '['"))?;
            let port = match tail {
                "" => None,
                t => match t.strip_prefix(':') {
                    Some(p) => Some(parse_port(input, p)?),
                    None => return Err(Error::invalid_address(input, "garbage after ']'")),
                },
            };
            return Ok(Self {
                host: validate_host(host)?,
                port,
            });
        }

        match input.matches(':').count() {
            0 => Ok(Self {
                host: validate_host(input)?,
                port: None,
            }),
            1 => {
                let (host, port) = input.split_once(':').unwrap_or((input, ""));
                Ok(Self {
                    host: validate_host(host)?,
                    port: Some(parse_port(input, port)?),
                })
            }
            // Bare IPv6 literal, no port
            _ => Ok(Self {
                host: validate_host(input)?,
                port: None,
            }),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.port {
            Some(port) if self.host.contains(':') => write!(f, "[{}]:{}", self.host, port),
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Communication password for a terminal.
///
/// # Security
/// The `Debug` output is redacted and equality is constant time, so the
/// value can travel through logs and comparisons without leaking.
#[derive(Clone, Eq)]
pub struct DeviceCredential(String);

impl DeviceCredential {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceCredential {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_PASSWORD)
    }
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("DeviceCredential(***)")
    }
}

impl PartialEq for DeviceCredential {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

/// Shared secret guarding the HTTP surface.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Constant-time check of a presented key.
    #[must_use]
    pub fn verify(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// User privilege as exposed to clients.
///
/// Terminals report a numeric level; only the administrator level is
/// distinguished, everything else is an ordinary user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privilege {
    Admin,
    User,
}

impl Privilege {
    #[inline]
    #[must_use]
    pub fn from_raw(level: u8) -> Self {
        if level == USER_PRIVILEGE_ADMIN {
            Privilege::Admin
        } else {
            Privilege::User
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Privilege::Admin => write!(f, "Admin"),
            Privilege::User => write!(f, "User"),
        }
    }
}

/// One stored attendance punch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub status: u8,
    pub punch: u8,
}

/// One enrolled user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: u16,
    pub user_id: String,
    pub name: String,
    pub privilege: Privilege,
    pub password: String,
    pub group_id: String,
}

/// Identity and clock of a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware_version: String,
    pub device_name: String,
    pub serial_number: String,
    pub mac_address: String,
    pub platform: String,
    pub device_time: String,
}

/// A punch pushed by a terminal while a realtime subscription is open.
///
/// Serializes to `{user_id, timestamp, status, punch, device_ip}` with an
/// ISO-8601 timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub status: u8,
    pub punch: u8,
    pub device_ip: String,
}

/// Highest finger index a template can be stored under.
pub const MAX_FINGER_INDEX: u8 = 9;

/// A fingerprint template to upload for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTemplate {
    pub user_id: String,
    pub finger_index: u8,
    pub template: Vec<u8>,
}

impl UserTemplate {
    /// # Errors
    /// Returns `Error::InvalidTemplate` if the user id is blank, the finger index is
    /// above [`MAX_FINGER_INDEX`] or the template is empty.
    pub fn new(user_id: impl Into<String>, finger_index: u8, template: Vec<u8>) -> Result<Self> {
        let t = Self {
            user_id: user_id.into(),
            finger_index,
            template,
        };
        t.validate()?;
        Ok(t)
    }

    /// Validate a template that arrived through deserialization.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::invalid_template("user_id", "must not be empty"));
        }
        if self.finger_index > MAX_FINGER_INDEX {
            return Err(Error::invalid_template(
                "finger_index",
                format!("must be 0-{MAX_FINGER_INDEX}, got {}", self.finger_index),
            ));
        }
        if self.template.is_empty() {
            return Err(Error::invalid_template("template", "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("192.168.1.201", "192.168.1.201", None)]
    #[case("192.168.1.201:4370", "192.168.1.201", Some(4370))]
    #[case(" terminal-01.local ", "terminal-01.local", None)]
    #[case("fe80::1", "fe80::1", None)]
    #[case("[fe80::1]:4371", "fe80::1", Some(4371))]
    fn test_device_address_valid(
        #[case] input: &str,
        #[case] host: &str,
        #[case] port: Option<u16>,
    ) {
        let addr: DeviceAddress = input.parse().unwrap();
        assert_eq!(addr.host(), host);
        assert_eq!(addr.port(), port);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("10.0.0.1:0")]
    #[case("10.0.0.1:99999")]
    #[case("10.0.0.1:abc")]
    #[case("10.0.0.1/24")]
    #[case("bad host")]
    #[case("[fe80::1")]
    fn test_device_address_invalid(#[case] input: &str) {
        let result: Result<DeviceAddress> = input.parse();
        assert!(matches!(result, Err(Error::InvalidAddress { .. })));
    }

    #[test]
    fn test_device_address_display_round_trip() {
        for input in ["10.0.0.7", "10.0.0.7:4370", "[fe80::1]:4370", "fe80::1"] {
            let addr: DeviceAddress = input.parse().unwrap();
            assert_eq!(addr.to_string(), input);
        }
    }

    #[test]
    fn test_device_address_port_or() {
        let addr: DeviceAddress = "10.0.0.7".parse().unwrap();
        assert_eq!(addr.port_or(4370), 4370);
        let addr = DeviceAddress::with_port("10.0.0.7", 5005).unwrap();
        assert_eq!(addr.port_or(4370), 5005);
        assert!(DeviceAddress::with_port("10.0.0.7", 0).is_err());
    }

    #[test]
    fn test_device_address_serde() {
        let addr: DeviceAddress = "10.0.0.7:4370".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.7:4370\"");
        let back: DeviceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<DeviceAddress>("\"\"").is_err());
    }

    #[test]
    fn test_credential_is_redacted() {
        let cred = DeviceCredential::new("123456");
        assert_eq!(format!("{cred:?}"), "DeviceCredential(***)");
        assert_eq!(cred.as_str(), "123456");
        assert_eq!(DeviceCredential::default().as_str(), "0");
        assert_eq!(cred, DeviceCredential::new("123456"));
        assert_ne!(cred, DeviceCredential::new("654321"));
    }

    #[test]
    fn test_api_key_verify() {
        let key = ApiKey::new("s3cret");
        assert!(key.verify("s3cret"));
        assert!(!key.verify("s3cre"));
        assert!(!key.verify(""));
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
    }

    #[rstest]
    #[case(14, Privilege::Admin)]
    #[case(0, Privilege::User)]
    #[case(3, Privilege::User)]
    fn test_privilege_from_raw(#[case] raw: u8, #[case] expected: Privilege) {
        assert_eq!(Privilege::from_raw(raw), expected);
    }

    #[test]
    fn test_live_event_json_shape() {
        let event = LiveEvent {
            user_id: "42".to_string(),
            timestamp: NaiveDateTime::parse_from_str("2025-03-01 08:15:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
            status: 1,
            punch: 0,
            device_ip: "10.0.0.7".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["user_id"], "42");
        assert_eq!(value["timestamp"], "2025-03-01T08:15:00");
        assert_eq!(value["device_ip"], "10.0.0.7");
    }

    #[test]
    fn test_user_template_validation() {
        assert!(UserTemplate::new("7", 0, vec![1, 2, 3]).is_ok());
        assert!(UserTemplate::new("7", 10, vec![1]).is_err());
        assert!(UserTemplate::new("  ", 1, vec![1]).is_err());
        assert!(UserTemplate::new("7", 1, vec![]).is_err());
    }

    #[test]
    fn test_user_template_errors_name_the_field() {
        let err = UserTemplate::new("7", 12, vec![1]).unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate { field: "finger_index", .. }));
        assert_eq!(err.to_string(), "Invalid template finger_index: must be 0-9, got 12");

        let err = UserTemplate::new("", 0, vec![1]).unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate { field: "user_id", .. }));
    }
}
