//! Device sessions.
//!
//! A [`DeviceSession`] wraps at most one open protocol connection to one
//! terminal. Opening retries connectivity failures with exponential backoff;
//! closing is idempotent, always releases the session from the
//! [`SessionRegistry`], and is final: a closed session never reconnects.
//!
//! All methods block the calling thread. Run them on the
//! [`WorkerPool`](crate::WorkerPool).
//!
//! # Example
//!
//! ```
//! use biogate_core::DeviceAddress;
//! use biogate_device::mock::SimulatedConnector;
//! use biogate_device::{ConnectParams, DeviceSession, RetryPolicy, SessionRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let connector = SimulatedConnector::new();
//! let terminal = connector.add_terminal("10.0.0.7");
//! let registry = SessionRegistry::new();
//!
//! let address: DeviceAddress = "10.0.0.7".parse().unwrap();
//! let params = ConnectParams {
//!     host: address.host().to_string(),
//!     port: 4370,
//!     timeout: Duration::from_secs(1),
//!     credential: Default::default(),
//!     verbose: false,
//! };
//! let session = DeviceSession::new(
//!     address,
//!     params,
//!     RetryPolicy::default(),
//!     Arc::new(connector),
//!     &registry,
//! );
//!
//! session.connect().unwrap();
//! assert!(session.is_connected());
//! session.disconnect();
//! session.disconnect();
//! assert!(registry.is_empty());
//! assert_eq!(terminal.stats().disconnects, 1);
//! ```

use crate::client::{ConnectParams, DeviceConnector, DeviceProtocolClient};
use crate::error::{ClientError, ClientResult, DeviceError, Result};
use crate::registry::{SessionId, SessionRegistry};
use biogate_core::DeviceAddress;
use biogate_core::constants::{DEFAULT_BACKOFF_UNIT_MS, DEFAULT_RECONNECT_ATTEMPTS};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connect retry schedule.
///
/// Attempt `n` (zero based) that fails with a connectivity error is
/// followed by a wait of `backoff_unit * 2^n`. No wait follows the last
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Base of the exponential backoff
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Wait after failed attempt `attempt` (zero based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }

    /// Every wait a fully failing connect goes through, in order.
    ///
    /// ```
    /// use biogate_device::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::new(3, Duration::from_secs(1));
    /// assert_eq!(policy.schedule(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    /// ```
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for(attempt))
            .collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_ATTEMPTS,
            Duration::from_millis(DEFAULT_BACKOFF_UNIT_MS),
        )
    }
}

pub(crate) struct SessionInner {
    id: SessionId,
    address: DeviceAddress,
    params: ConnectParams,
    retry: RetryPolicy,
    connector: Arc<dyn DeviceConnector>,
    registry: SessionRegistry,
    client: Mutex<Option<Box<dyn DeviceProtocolClient>>>,

    /// Set under the `client` lock by `disconnect`
    closed: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let client = self
            .client
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut client) = client {
            warn!(device = %self.address, session = %self.id, "Session dropped while connected");
            if let Err(e) = client.disconnect() {
                warn!(device = %self.address, session = %self.id, error = %e, "Error while disconnecting");
            }
        }
        self.registry.remove(self.id);
    }
}

/// One logical connection to one terminal.
///
/// Cloning is cheap; clones refer to the same connection.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl DeviceSession {
    /// Create a session and register it. Nothing is dialed until
    /// [`connect`](Self::connect).
    pub fn new(
        address: DeviceAddress,
        params: ConnectParams,
        retry: RetryPolicy,
        connector: Arc<dyn DeviceConnector>,
        registry: &SessionRegistry,
    ) -> Self {
        let inner = Arc::new(SessionInner {
            id: SessionId::new(),
            address,
            params,
            retry,
            connector,
            registry: registry.clone(),
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        registry.insert(inner.id, Arc::downgrade(&inner));
        debug!(device = %inner.address, session = %inner.id, "Session created");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    #[must_use]
    pub fn address(&self) -> &DeviceAddress {
        &self.inner.address
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client().is_some()
    }

    /// `true` once [`disconnect`](Self::disconnect) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn client(&self) -> MutexGuard<'_, Option<Box<dyn DeviceProtocolClient>>> {
        self.inner.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the connection using the session's retry policy.
    ///
    /// # Errors
    /// See [`connect_with`](Self::connect_with).
    pub fn connect(&self) -> Result<()> {
        self.connect_with(self.inner.retry.max_attempts)
    }

    /// Open the connection, trying up to `max_attempts` times.
    ///
    /// A session that is already connected returns immediately. If the
    /// session is closed while an attempt is in flight, the new connection
    /// is released at once.
    ///
    /// # Errors
    /// - `DeviceError::ConnectionFailed` once every attempt failed with a
    ///   connectivity error
    /// - `DeviceError::Protocol` on the first non-connectivity error; it is
    ///   not retried
    /// - `DeviceError::Connectivity` if the session is or becomes closed
    pub fn connect_with(&self, max_attempts: u32) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let address = &self.inner.address;
        let attempts = max_attempts.max(1);
        let mut last_error: Option<ClientError> = None;

        for attempt in 0..attempts {
            if self.is_closed() {
                return Err(self.closed_error());
            }
            match self.inner.connector.connect(&self.inner.params) {
                Ok(client) => {
                    self.store_client(client)?;
                    info!(
                        device = %address,
                        session = %self.inner.id,
                        attempt = attempt + 1,
                        "Connected to device"
                    );
                    return Ok(());
                }
                Err(e) if e.is_connectivity() => {
                    if attempt + 1 < attempts {
                        let wait = self.inner.retry.delay_for(attempt);
                        warn!(
                            device = %address,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            retry_in_ms = wait.as_millis() as u64,
                            error = %e,
                            "Connection attempt failed"
                        );
                        std::thread::sleep(wait);
                    } else {
                        error!(
                            device = %address,
                            attempts,
                            error = %e,
                            "Giving up on device connection"
                        );
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(device = %address, error = %e, "Device refused the session");
                    return Err(DeviceError::from_client(address, e));
                }
            }
        }

        Err(DeviceError::ConnectionFailed {
            address: address.clone(),
            attempts,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn closed_error(&self) -> DeviceError {
        DeviceError::Connectivity {
            address: self.inner.address.clone(),
            message: "session is closed".to_string(),
        }
    }

    fn store_client(&self, mut client: Box<dyn DeviceProtocolClient>) -> Result<()> {
        let mut slot = self.client();
        if !self.is_closed() {
            *slot = Some(client);
            return Ok(());
        }
        drop(slot);

        warn!(
            device = %self.inner.address,
            session = %self.inner.id,
            "Session closed while connecting, releasing connection"
        );
        if let Err(e) = client.disconnect() {
            warn!(device = %self.inner.address, session = %self.inner.id, error = %e, "Error while disconnecting");
        }
        Err(self.closed_error())
    }

    /// Close the connection.
    ///
    /// Safe to call any number of times. A failure while closing is logged
    /// and otherwise ignored; the session is unregistered either way.
    pub fn disconnect(&self) {
        let client = {
            let mut slot = self.client();
            self.inner.closed.store(true, Ordering::SeqCst);
            slot.take()
        };
        if let Some(mut client) = client {
            match client.disconnect() {
                Ok(()) => info!(device = %self.inner.address, session = %self.inner.id, "Disconnected from device"),
                Err(e) => warn!(
                    device = %self.inner.address,
                    session = %self.inner.id,
                    error = %e,
                    "Error while disconnecting"
                ),
            }
        }
        self.inner.registry.remove(self.inner.id);
    }

    /// Re-enable the terminal if it is connected, then disconnect.
    ///
    /// Used to close sessions found open at shutdown. An enable failure is
    /// logged and does not prevent the disconnect.
    pub fn release(&self) {
        if let Err(e) = self.enable_device() {
            warn!(device = %self.inner.address, session = %self.inner.id, error = %e, "Failed to re-enable device");
        }
        self.disconnect();
    }

    /// Lock the terminal's keypad. No-op without an open connection.
    ///
    /// # Errors
    /// Returns the device's failure, tagged with the address.
    pub fn disable_device(&self) -> Result<()> {
        self.if_connected(|c| c.disable_device())
    }

    /// Unlock the terminal's keypad. No-op without an open connection.
    ///
    /// # Errors
    /// Returns the device's failure, tagged with the address.
    pub fn enable_device(&self) -> Result<()> {
        self.if_connected(|c| c.enable_device())
    }

    fn if_connected(
        &self,
        call: impl FnOnce(&mut dyn DeviceProtocolClient) -> ClientResult<()>,
    ) -> Result<()> {
        match self.client().as_mut() {
            Some(client) => {
                call(client.as_mut()).map_err(|e| DeviceError::from_client(&self.inner.address, e))
            }
            None => Ok(()),
        }
    }

    /// Run a call against the open connection.
    ///
    /// The connection stays locked for the duration of `call`.
    ///
    /// # Errors
    /// `DeviceError::Connectivity` if the session is not connected, or the
    /// call's own failure tagged with the address.
    pub fn with_client<T>(
        &self,
        call: impl FnOnce(&mut dyn DeviceProtocolClient) -> ClientResult<T>,
    ) -> Result<T> {
        let mut guard = self.client();
        let client = guard.as_mut().ok_or_else(|| DeviceError::Connectivity {
            address: self.inner.address.clone(),
            message: "session is not connected".to_string(),
        })?;
        call(client.as_mut()).map_err(|e| DeviceError::from_client(&self.inner.address, e))
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.inner.id)
            .field("address", &self.inner.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}
