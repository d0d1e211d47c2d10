//! Simulated terminals for testing and development.
//!
//! [`SimulatedConnector`] implements [`DeviceConnector`](crate::DeviceConnector)
//! against in-memory terminals. Each terminal is driven through a
//! [`TerminalHandle`]: seed users and punches, push live events, make the
//! terminal unreachable, inject failures, and read back call counters.

mod terminal;

pub use terminal::{Operation, SimulatedConnector, TerminalHandle, TerminalStats};
