//! Error types for device sessions.
//!
//! Three layers, from the wire outwards:
//!
//! - [`ClientError`] is what a protocol client reports for a single call.
//! - [`DeviceError`] is what a session reports, tagged with the address and
//!   with connect retries already applied.
//! - [`OperationError`] is the single error an exclusive operation surfaces
//!   to its caller, classified by [`FailureKind`].

use biogate_core::DeviceAddress;
use std::fmt;

/// Result type alias for session-level operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Result type alias for protocol client calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Failure reported by a protocol client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No answer within the configured timeout.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The remote end refused the connection.
    #[error("connection refused")]
    Refused,

    /// Socket-level failure (reset, unreachable, broken pipe).
    #[error("transport error: {0}")]
    Transport(String),

    /// The device answered but rejected the request.
    #[error("{0}")]
    Protocol(String),
}

impl ClientError {
    /// Create a new transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns `true` for timeouts, refusals and transport failures.
    ///
    /// Only this class is retried when opening a session.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

/// Failure reported by a [`DeviceSession`](crate::DeviceSession).
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    /// A single connectivity-class failure.
    #[error("Connection error on {address}: {message}")]
    Connectivity {
        address: DeviceAddress,
        message: String,
    },

    /// Every connect attempt failed with a connectivity-class error.
    #[error("Connection to {address} failed after {attempts} attempts: {message}")]
    ConnectionFailed {
        address: DeviceAddress,
        attempts: u32,
        message: String,
    },

    /// The device rejected a request.
    #[error("Device {address} error: {message}")]
    Protocol {
        address: DeviceAddress,
        message: String,
    },

    /// A blocking call could not be run or did not complete.
    #[error("Worker failure: {0}")]
    Worker(String),
}

impl DeviceError {
    /// Tag a client failure with the address it happened on.
    pub fn from_client(address: &DeviceAddress, error: ClientError) -> Self {
        if error.is_connectivity() {
            Self::Connectivity {
                address: address.clone(),
                message: error.to_string(),
            }
        } else {
            Self::Protocol {
                address: address.clone(),
                message: error.to_string(),
            }
        }
    }

    /// Create a new worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Protocol { .. } => FailureKind::Protocol,
            Self::Connectivity { .. } | Self::ConnectionFailed { .. } | Self::Worker(_) => {
                FailureKind::Unavailable
            }
        }
    }
}

/// Coarse classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The device could not be reached (including retry exhaustion).
    Unavailable,

    /// The device was reached but reported an error.
    Protocol,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "device unavailable"),
            Self::Protocol => write!(f, "device protocol error"),
        }
    }
}

/// The error an exclusive operation surfaces to its caller.
///
/// Both failure kinds are reported to clients the same way (service
/// unavailable with the cause string); the kind is kept for logging and for
/// callers that want to distinguish them.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{cause}")]
pub struct OperationError {
    pub kind: FailureKind,
    pub address: DeviceAddress,
    pub cause: String,
}

impl OperationError {
    pub fn new(address: &DeviceAddress, error: DeviceError) -> Self {
        Self {
            kind: error.kind(),
            address: address.clone(),
            cause: error.to_string(),
        }
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.kind == FailureKind::Unavailable
    }
}
