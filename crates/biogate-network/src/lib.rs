//! HTTP and websocket front end for the biogate gateway.
//!
//! The [`router`] exposes terminal operations from `biogate-device` as a
//! small REST API guarded by a shared API key, plus two websocket
//! endpoints: a per-terminal realtime relay and a hub that fans out status
//! changes and live punches to any number of subscribers.
//!
//! # Example
//!
//! ```no_run
//! use biogate_core::ServiceConfig;
//! use biogate_device::mock::SimulatedConnector;
//! use biogate_device::{DeviceService, DeviceStatusCache};
//! use biogate_network::{AppState, BroadcastHub, serve};
//! use std::sync::Arc;
//!
//! # async fn example() -> std::io::Result<()> {
//! let config = ServiceConfig::default();
//! let service = DeviceService::new(Arc::new(SimulatedConnector::new()), &config);
//! let state = AppState::new(service, DeviceStatusCache::new(), BroadcastHub::new(), &config);
//!
//! let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//! serve(listener, state).await
//! # }
//! ```

pub mod api;
pub mod error;
pub mod hub;
pub mod server;
pub mod state;
pub mod ws;

pub use api::{DeviceTarget, router};
pub use error::{ApiError, Result};
pub use hub::{BroadcastHub, HubMessage, SubscriberId, Subscription, relay_status_changes};
pub use server::serve;
pub use state::AppState;
