//! Shared building blocks for the biogate terminal gateway.
//!
//! This crate holds the value types every other crate keys on
//! ([`DeviceAddress`], [`DeviceCredential`]), the response entities returned
//! to HTTP clients ([`AttendanceRecord`], [`User`], [`DeviceInfo`],
//! [`LiveEvent`]), the service configuration and the validation error type.
//!
//! Nothing in here performs I/O.

pub mod compat;
pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
