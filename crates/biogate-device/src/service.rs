//! Exclusive device operations.
//!
//! [`DeviceService`] is the single entry point for talking to terminals.
//! Every operation is bracketed:
//!
//! 1. wait for the terminal's [`DeviceGate`] pass
//! 2. connect (with retries)
//! 3. disable the terminal's keypad
//! 4. run the operation
//! 5. re-enable the keypad and disconnect
//!
//! Each step runs on the [`WorkerPool`]. Step 5 runs no matter how steps 2-4
//! ended, and the whole bracket runs as its own task, so a caller that stops
//! waiting never leaves a terminal locked or a connection open.
//!
//! [`DeviceService::shutdown`] refuses new brackets, waits for running ones
//! to finish their teardown, and only then closes the pool.

use crate::client::{ConnectParams, DeviceConnector};
use crate::error::{DeviceError, FailureKind, OperationError, Result};
use crate::gate::{DeviceGate, GatePass};
use crate::pool::WorkerPool;
use crate::registry::SessionRegistry;
use crate::session::{DeviceSession, RetryPolicy};
use biogate_core::{
    AttendanceRecord, DeviceAddress, DeviceCredential, DeviceInfo, ServiceConfig, User,
    UserTemplate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// How sessions opened by a [`DeviceService`] dial terminals.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Port used when an address carries none
    pub default_port: u16,

    /// Per-attempt connect timeout
    pub timeout: Duration,

    /// Password used when a request does not supply one
    pub credential: DeviceCredential,

    pub retry: RetryPolicy,

    /// Verbose protocol clients
    pub verbose: bool,
}

impl From<&ServiceConfig> for SessionSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            default_port: config.device_port,
            timeout: config.device_timeout,
            credential: config.device_password.clone(),
            retry: RetryPolicy::new(config.reconnect_attempts, config.backoff_unit),
            verbose: config.debug,
        }
    }
}

struct ServiceInner {
    connector: Arc<dyn DeviceConnector>,
    settings: SessionSettings,
    pool: WorkerPool,
    registry: SessionRegistry,
    gate: DeviceGate,
    brackets: TaskTracker,
    closing: CancellationToken,
}

/// Runs bracketed operations against terminals.
///
/// Cloning is cheap; clones share the pool, registry and gate.
///
/// # Examples
///
/// ```
/// use biogate_core::ServiceConfig;
/// use biogate_device::DeviceService;
/// use biogate_device::mock::SimulatedConnector;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let connector = SimulatedConnector::new();
///     let terminal = connector.add_terminal("10.0.0.7");
///     terminal.seed_demo();
///
///     let service = DeviceService::new(Arc::new(connector), &ServiceConfig::default());
///     let users = service.get_users(&"10.0.0.7".parse().unwrap(), None).await.unwrap();
///
///     assert_eq!(users.len(), 3);
///     assert!(terminal.stats().enabled);
///     assert!(service.registry().is_empty());
/// }
/// ```
#[derive(Clone)]
pub struct DeviceService {
    inner: Arc<ServiceInner>,
}

impl DeviceService {
    /// Build a service with a pool of `config.max_workers` workers.
    pub fn new(connector: Arc<dyn DeviceConnector>, config: &ServiceConfig) -> Self {
        Self::with_settings(
            connector,
            SessionSettings::from(config),
            WorkerPool::new(config.max_workers),
        )
    }

    pub fn with_settings(
        connector: Arc<dyn DeviceConnector>,
        settings: SessionSettings,
        pool: WorkerPool,
    ) -> Self {
        let gate = DeviceGate::new(settings.default_port);
        Self {
            inner: Arc::new(ServiceInner {
                connector,
                settings,
                pool,
                registry: SessionRegistry::new(),
                gate,
                brackets: TaskTracker::new(),
                closing: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn gate(&self) -> &DeviceGate {
        &self.inner.gate
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Fires when [`shutdown`](Self::shutdown) starts.
    ///
    /// Long-running operations watch it to end early.
    #[must_use]
    pub fn closing(&self) -> &CancellationToken {
        &self.inner.closing
    }

    /// Create (but do not connect) a registered session for `address`.
    pub fn open_session(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
    ) -> DeviceSession {
        let settings = &self.inner.settings;
        let params = ConnectParams {
            host: address.host().to_string(),
            port: address.port_or(settings.default_port),
            timeout: settings.timeout,
            credential: credential.unwrap_or_else(|| settings.credential.clone()),
            verbose: settings.verbose,
        };
        DeviceSession::new(
            address.clone(),
            params,
            settings.retry,
            self.inner.connector.clone(),
            &self.inner.registry,
        )
    }

    /// Run `operation` inside the full bracket, waiting for the terminal if
    /// another operation holds it.
    ///
    /// `operation` runs on a worker against a connected, disabled session.
    ///
    /// # Errors
    /// Any failure of the bracket or of `operation`, classified as
    /// unavailable or protocol.
    pub async fn execute<T, F>(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
        operation: F,
    ) -> std::result::Result<T, OperationError>
    where
        F: FnOnce(&DeviceSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pass = self.inner.gate.acquire(address).await;
        self.spawn_bracket(pass, address, credential, operation).await
    }

    /// Like [`execute`](Self::execute), but returns `None` immediately if
    /// another operation holds the terminal.
    pub async fn try_execute<T, F>(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
        operation: F,
    ) -> Option<std::result::Result<T, OperationError>>
    where
        F: FnOnce(&DeviceSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pass = self.inner.gate.try_acquire(address)?;
        Some(self.spawn_bracket(pass, address, credential, operation).await)
    }

    async fn spawn_bracket<T, F>(
        &self,
        pass: GatePass,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
        operation: F,
    ) -> std::result::Result<T, OperationError>
    where
        F: FnOnce(&DeviceSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let result = if self.inner.closing.is_cancelled() {
            drop(pass);
            Err(shutting_down())
        } else {
            let service = self.clone();
            let session = self.open_session(address, credential);
            let task = self.inner.brackets.spawn(async move {
                let _pass = pass;
                service.bracket(session, operation).await
            });
            match task.await {
                Ok(result) => result,
                Err(e) => Err(DeviceError::worker(e.to_string())),
            }
        };

        result.map_err(|e| {
            let err = OperationError::new(address, e);
            match err.kind {
                FailureKind::Unavailable => {
                    warn!(device = %address, error = %err, "Device unavailable")
                }
                FailureKind::Protocol => {
                    error!(device = %address, error = %err, "Device operation failed")
                }
            }
            err
        })
    }

    async fn bracket<T, F>(&self, session: DeviceSession, operation: F) -> Result<T>
    where
        F: FnOnce(&DeviceSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let result = self.run_locked(&session, operation).await;
        self.teardown(session).await;
        result
    }

    async fn run_locked<T, F>(&self, session: &DeviceSession, operation: F) -> Result<T>
    where
        F: FnOnce(&DeviceSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = &self.inner.pool;

        if self.inner.closing.is_cancelled() {
            return Err(shutting_down());
        }
        let s = session.clone();
        pool.run(move || s.connect()).await??;

        let s = session.clone();
        pool.run(move || s.disable_device()).await??;

        let s = session.clone();
        pool.run(move || operation(&s)).await?
    }

    async fn teardown(&self, session: DeviceSession) {
        let address = session.address().clone();
        let id = session.id();
        let pool = &self.inner.pool;

        if session.is_connected() {
            let s = session.clone();
            match pool.run(move || s.enable_device()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) | Err(e) => {
                    warn!(device = %address, session = %id, error = %e, "Failed to re-enable device")
                }
            }
        }

        let s = session.clone();
        if let Err(e) = pool.run(move || s.disconnect()).await {
            error!(device = %address, session = %id, error = %e, "Failed to run disconnect");
        }
        debug!(device = %address, session = %id, "Session closed");
    }

    /// Every enrolled user.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn get_users(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
    ) -> std::result::Result<Vec<User>, OperationError> {
        self.execute(address, credential, |session| {
            let users = session.with_client(|c| c.get_users())?;
            Ok(users.into_iter().map(User::from).collect())
        })
        .await
    }

    /// Every stored punch.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn get_attendance(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
    ) -> std::result::Result<Vec<AttendanceRecord>, OperationError> {
        self.execute(address, credential, |session| {
            let records = session.with_client(|c| c.get_attendance())?;
            Ok(records.into_iter().map(AttendanceRecord::from).collect())
        })
        .await
    }

    /// Terminal identity and clock.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn get_device_info(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
    ) -> std::result::Result<DeviceInfo, OperationError> {
        self.execute(address, credential, fetch_info).await
    }

    /// Like [`get_device_info`](Self::get_device_info), skipped when the
    /// terminal is busy.
    pub async fn try_get_device_info(
        &self,
        address: &DeviceAddress,
    ) -> Option<std::result::Result<DeviceInfo, OperationError>> {
        self.try_execute(address, None, fetch_info).await
    }

    /// Play voice prompt `index`.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn test_voice(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
        index: u8,
    ) -> std::result::Result<(), OperationError> {
        self.execute(address, credential, move |session| {
            session.with_client(|c| c.test_voice(index))
        })
        .await
    }

    /// Store fingerprint templates. Returns how many were stored.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn upload_templates(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
        templates: Vec<UserTemplate>,
    ) -> std::result::Result<usize, OperationError> {
        self.execute(address, credential, move |session| {
            session.with_client(|c| c.save_user_templates(&templates))?;
            Ok(templates.len())
        })
        .await
    }

    /// Refuse further work, let running operations finish their teardown,
    /// then release every session still registered.
    ///
    /// Returns the number of sessions the final drain closed; sessions
    /// closed by their own teardown are not counted.
    pub async fn shutdown(&self) -> usize {
        let inner = &self.inner;
        inner.closing.cancel();
        inner.brackets.close();
        if !inner.brackets.is_empty() {
            info!(operations = inner.brackets.len(), "Waiting for device operations to finish");
        }
        inner.brackets.wait().await;

        let closed = inner.registry.drain(&inner.pool).await;
        inner.pool.close();
        closed
    }
}

fn shutting_down() -> DeviceError {
    DeviceError::worker("service is shutting down")
}

fn fetch_info(session: &DeviceSession) -> Result<DeviceInfo> {
    session
        .with_client(|c| c.get_device_info())
        .map(DeviceInfo::from)
}

impl std::fmt::Debug for DeviceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceService")
            .field("settings", &self.inner.settings)
            .field("pool", &self.inner.pool)
            .field("registry", &self.inner.registry)
            .finish()
    }
}
