//! Firmware compatibility table.
//!
//! A terminal is considered compatible when its platform is listed below and
//! the reported firmware version contains the expected version string.

use crate::types::DeviceInfo;

/// Known platforms and the firmware version each is validated against.
pub const COMPATIBLE_DEVICES: &[(&str, &str)] = &[
    ("ZEM500", "Ver 6.21"),
    ("ZEM510_TFT", "Ver 6.60"),
    ("ZEM600_TFT", "Ver 6.60"),
    ("ZEM800_TFT", "Ver 6.60"),
];

/// Expected firmware for a platform, if the platform is known.
#[must_use]
pub fn expected_firmware(platform: &str) -> Option<&'static str> {
    COMPATIBLE_DEVICES
        .iter()
        .find(|(p, _)| *p == platform)
        .map(|(_, fw)| *fw)
}

/// Returns `true` if the terminal runs a validated platform/firmware pair.
///
/// # Examples
///
/// ```
/// use biogate_core::{DeviceInfo, compat::is_compatible};
///
/// let info = DeviceInfo {
///     firmware_version: "Ver 6.60 Apr 28 2017".into(),
///     device_name: "K40".into(),
///     serial_number: "A1B2".into(),
///     mac_address: "00:17:61:aa:bb:cc".into(),
///     platform: "ZEM600_TFT".into(),
///     device_time: "2025-03-01 08:15:00".into(),
/// };
/// assert!(is_compatible(&info));
/// ```
#[must_use]
pub fn is_compatible(info: &DeviceInfo) -> bool {
    expected_firmware(&info.platform).is_some_and(|fw| info.firmware_version.contains(fw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(platform: &str, firmware: &str) -> DeviceInfo {
        DeviceInfo {
            firmware_version: firmware.to_string(),
            device_name: "test".to_string(),
            serial_number: "0".to_string(),
            mac_address: "00:00:00:00:00:00".to_string(),
            platform: platform.to_string(),
            device_time: "2025-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn test_known_platform_matching_firmware() {
        assert!(is_compatible(&info("ZEM500", "Ver 6.21 Nov 19 2008")));
        assert!(is_compatible(&info("ZEM800_TFT", "Ver 6.60")));
    }

    #[test]
    fn test_known_platform_other_firmware() {
        assert!(!is_compatible(&info("ZEM500", "Ver 6.60")));
    }

    #[test]
    fn test_unknown_platform() {
        assert!(!is_compatible(&info("JZ4725_TFT", "Ver 6.60")));
        assert_eq!(expected_firmware("JZ4725_TFT"), None);
    }
}
