//! Service-wide constants.
//!
//! Defaults for every configuration knob live here so the configuration
//! layer, the CLI and the tests agree on a single value.
//!
//! # Usage
//!
//! ```
//! use biogate_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(DEFAULT_DEVICE_PORT, 4370);
//! let timeout = Duration::from_secs(DEFAULT_DEVICE_TIMEOUT_SECS);
//! assert_eq!(timeout.as_secs(), 5);
//! ```

// ============================================================================
// Device Connection
// ============================================================================

/// Default TCP/UDP port terminals listen on.
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

/// Default per-attempt connect timeout in seconds.
pub const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 5;

/// Default communication password used when no override is supplied.
///
/// Terminals ship with password `0`, which the protocol treats as "no
/// password".
pub const DEFAULT_DEVICE_PASSWORD: &str = "0";

/// Default number of connect attempts before a session gives up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Default backoff unit in milliseconds.
///
/// Attempt `n` (zero based) waits `2^n` units before the next attempt, so
/// with the default unit the waits are 1s, 2s, 4s, ...
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1000;

// ============================================================================
// Concurrency
// ============================================================================

/// Default number of worker threads available for blocking device calls.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default interval between status poll cycles in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Default lifetime of a realtime subscription in seconds.
pub const DEFAULT_REALTIME_TIMEOUT_SECS: u64 = 300;

/// How long a single live-capture pull waits for a device packet before
/// yielding so the loop can re-check its deadline and cancellation.
pub const LIVE_CAPTURE_POLL_MS: u64 = 500;

// ============================================================================
// HTTP Surface
// ============================================================================

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Default shared secret expected in the `X-API-Key` header.
pub const DEFAULT_API_KEY: &str = "default-secret-key";

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying an optional per-request device password override.
pub const DEVICE_PASSWORD_HEADER: &str = "x-device-password";

// ============================================================================
// Device Semantics
// ============================================================================

/// Raw privilege level the protocol reports for administrators.
///
/// Every other value maps to an ordinary user.
pub const USER_PRIVILEGE_ADMIN: u8 = 14;

/// Raw privilege level for ordinary users.
pub const USER_PRIVILEGE_DEFAULT: u8 = 0;

/// Voice prompt index for "Thank you".
pub const VOICE_THANK_YOU: u8 = 0;
