//! Terminal sessions and the concurrency around them.
//!
//! Terminals are reached through a blocking protocol client, accept a
//! single session at a time, and must be locked (disabled) while a session
//! reads or writes their data. This crate turns that into a safe async API:
//!
//! - [`DeviceConnector`] / [`DeviceProtocolClient`]: the blocking client seam
//! - [`WorkerPool`]: bounded workers for blocking calls
//! - [`DeviceSession`]: one connection with retrying connect and idempotent
//!   disconnect
//! - [`SessionRegistry`]: every open session, for shutdown
//! - [`DeviceGate`]: one operation per terminal at a time
//! - [`DeviceService`]: bracketed operations (connect, disable, run, enable,
//!   disconnect)
//! - [`RealtimeEventBridge`]: live punches from a worker to an async
//!   consumer
//! - [`monitor`]: periodic reachability checks and the status cache
//! - [`mock`]: simulated terminals
//!
//! # Example
//!
//! ```
//! use biogate_core::ServiceConfig;
//! use biogate_device::DeviceService;
//! use biogate_device::mock::SimulatedConnector;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let connector = SimulatedConnector::new();
//!     connector.add_terminal("10.0.0.7").seed_demo();
//!
//!     let service = DeviceService::new(Arc::new(connector), &ServiceConfig::default());
//!     let address = "10.0.0.7".parse().unwrap();
//!
//!     let info = service.get_device_info(&address, None).await.unwrap();
//!     assert_eq!(info.platform, "ZEM600_TFT");
//!
//!     let records = service.get_attendance(&address, None).await.unwrap();
//!     assert_eq!(records.len(), 4);
//! }
//! ```

pub mod client;
pub mod error;
pub mod gate;
pub mod mock;
pub mod monitor;
pub mod pool;
pub mod realtime;
pub mod registry;
pub mod service;
pub mod session;

pub use client::{
    ConnectParams, DeviceConnector, DeviceProtocolClient, RawAttendance, RawDeviceInfo, RawUser,
};
pub use error::{ClientError, ClientResult, DeviceError, FailureKind, OperationError, Result};
pub use gate::{DeviceGate, GatePass};
pub use monitor::{DeviceStatus, DeviceStatusCache, HealthSummary, StatusChange, StatusPoller};
pub use pool::WorkerPool;
pub use realtime::{CaptureExit, CaptureSummary, LiveCapture, RealtimeEventBridge};
pub use registry::{SessionId, SessionRegistry};
pub use service::{DeviceService, SessionSettings};
pub use session::{DeviceSession, RetryPolicy};
