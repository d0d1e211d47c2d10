use crate::client::{
    ConnectParams, DeviceConnector, DeviceProtocolClient, RawAttendance, RawDeviceInfo, RawUser,
};
use crate::error::{ClientError, ClientResult};
use biogate_core::{DeviceCredential, UserTemplate};
use chrono::{Local, NaiveDateTime, Timelike};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Client calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Disable,
    Enable,
    GetUsers,
    GetAttendance,
    GetDeviceInfo,
    TestVoice,
    LiveCapture,
    SaveTemplates,
    Disconnect,
}

/// Counters a terminal keeps about the calls it received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalStats {
    /// Connect calls, successful or not
    pub connect_attempts: u32,

    /// Successful connects
    pub connects: u32,

    /// Explicit disconnects on an open connection
    pub disconnects: u32,

    pub disables: u32,
    pub enables: u32,

    /// Connections currently open
    pub open_connections: u32,

    /// Highest number of connections that were open at the same time
    pub peak_connections: u32,

    /// `false` while the keypad is locked
    pub enabled: bool,

    /// Voice prompts played, in order
    pub voice_prompts: Vec<u8>,

    /// Templates stored, in order
    pub templates: Vec<UserTemplate>,
}

struct TerminalState {
    info: RawDeviceInfo,
    users: Vec<RawUser>,
    attendance: Vec<RawAttendance>,
    password: DeviceCredential,
    reachable: bool,
    refused_connects: u32,
    latency: Duration,
    failures: HashMap<Operation, ClientError>,
    live: VecDeque<RawAttendance>,
    stats: TerminalStats,
}

struct Shared {
    state: Mutex<TerminalState>,
    live_ready: Condvar,
}

/// Control handle for one simulated terminal.
///
/// # Examples
///
/// ```
/// use biogate_device::mock::SimulatedConnector;
///
/// let connector = SimulatedConnector::new();
/// let terminal = connector.add_terminal("10.0.0.7");
/// terminal.seed_demo();
/// terminal.set_reachable(false);
/// assert_eq!(terminal.stats().connects, 0);
/// ```
#[derive(Clone)]
pub struct TerminalHandle {
    shared: Arc<Shared>,
}

impl TerminalHandle {
    fn new(host: &str) -> Self {
        let now = Local::now().naive_local().with_nanosecond(0).unwrap_or_default();
        let info = RawDeviceInfo {
            firmware_version: "Ver 6.60 Apr 28 2017".to_string(),
            device_name: format!("Simulated {host}"),
            serial_number: format!("SIM-{}", host.replace(['.', ':'], "")),
            mac_address: "00:17:61:00:00:01".to_string(),
            platform: "ZEM600_TFT".to_string(),
            device_time: now,
        };
        let stats = TerminalStats {
            enabled: true,
            ..TerminalStats::default()
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TerminalState {
                    info,
                    users: Vec::new(),
                    attendance: Vec::new(),
                    password: DeviceCredential::default(),
                    reachable: true,
                    refused_connects: 0,
                    latency: Duration::ZERO,
                    failures: HashMap::new(),
                    live: VecDeque::new(),
                    stats,
                }),
                live_ready: Condvar::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TerminalState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_info(&self, info: RawDeviceInfo) {
        self.state().info = info;
    }

    pub fn set_users(&self, users: Vec<RawUser>) {
        self.state().users = users;
    }

    pub fn set_attendance(&self, attendance: Vec<RawAttendance>) {
        self.state().attendance = attendance;
    }

    /// Password the terminal expects on connect.
    pub fn set_password(&self, password: &str) {
        self.state().password = DeviceCredential::new(password);
    }

    /// An unreachable terminal times out every connect.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Refuse the next `count` connects, then accept again.
    pub fn fail_connects(&self, count: u32) {
        self.state().refused_connects = count;
    }

    /// Delay every connect by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Make `operation` fail with `error` until cleared.
    pub fn fail(&self, operation: Operation, error: ClientError) {
        self.state().failures.insert(operation, error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Queue a punch for the next live-capture pull.
    pub fn push_live_event(&self, event: RawAttendance) {
        self.state().live.push_back(event);
        self.shared.live_ready.notify_all();
    }

    /// Queue a punch for `user_id` stamped with the current local time.
    pub fn punch(&self, user_id: &str) {
        let timestamp = Local::now().naive_local().with_nanosecond(0).unwrap_or_default();
        self.push_live_event(RawAttendance {
            user_id: user_id.to_string(),
            timestamp,
            status: 1,
            punch: 0,
        });
    }

    /// Live punches not yet pulled.
    #[must_use]
    pub fn pending_live_events(&self) -> usize {
        self.state().live.len()
    }

    #[must_use]
    pub fn stats(&self) -> TerminalStats {
        self.state().stats.clone()
    }

    /// Load a few users and stored punches.
    pub fn seed_demo(&self) {
        let day = Local::now().date_naive();
        let at = |h: u32, m: u32| day.and_hms_opt(h, m, 0).unwrap_or_default();
        let users = [
            (1, "1001", "Ana Souza", 14),
            (2, "1002", "Bruno Lima", 0),
            (3, "1003", "Carla Dias", 0),
        ];

        let mut state = self.state();
        state.users = users
            .iter()
            .map(|&(uid, user_id, name, privilege)| RawUser {
                uid,
                user_id: user_id.to_string(),
                name: name.to_string(),
                privilege,
                password: String::new(),
                group_id: "1".to_string(),
            })
            .collect();
        state.attendance = vec![
            attendance("1001", at(8, 2), 0),
            attendance("1002", at(8, 15), 0),
            attendance("1001", at(12, 1), 1),
            attendance("1003", at(13, 30), 0),
        ];
    }

    fn accept(&self, params: &ConnectParams) -> ClientResult<Box<dyn DeviceProtocolClient>> {
        let latency = {
            let mut state = self.state();
            state.stats.connect_attempts += 1;
            state.latency
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = self.state();
        if !state.reachable {
            return Err(ClientError::Timeout(params.timeout.as_millis() as u64));
        }
        if state.refused_connects > 0 {
            state.refused_connects -= 1;
            return Err(ClientError::Refused);
        }
        if state.password != params.credential {
            return Err(ClientError::protocol("Unauthenticated"));
        }

        state.stats.connects += 1;
        state.stats.open_connections += 1;
        state.stats.peak_connections = state
            .stats
            .peak_connections
            .max(state.stats.open_connections);

        Ok(Box::new(SimulatedClient {
            terminal: self.clone(),
            open: true,
        }))
    }
}

fn attendance(user_id: &str, timestamp: NaiveDateTime, status: u8) -> RawAttendance {
    RawAttendance {
        user_id: user_id.to_string(),
        timestamp,
        status,
        punch: 0,
    }
}

/// Connector backed by in-memory terminals, keyed by host.
///
/// Connecting to a host with no terminal times out, like an address with
/// nothing listening.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    terminals: Arc<Mutex<HashMap<String, TerminalHandle>>>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn terminals(&self) -> MutexGuard<'_, HashMap<String, TerminalHandle>> {
        self.terminals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a terminal at `host`, replacing any previous one.
    pub fn add_terminal(&self, host: &str) -> TerminalHandle {
        let handle = TerminalHandle::new(host);
        self.terminals().insert(host.to_string(), handle.clone());
        handle
    }

    #[must_use]
    pub fn terminal(&self, host: &str) -> Option<TerminalHandle> {
        self.terminals().get(host).cloned()
    }

    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.terminals().keys().cloned().collect()
    }
}

impl DeviceConnector for SimulatedConnector {
    fn connect(&self, params: &ConnectParams) -> ClientResult<Box<dyn DeviceProtocolClient>> {
        match self.terminal(&params.host) {
            Some(terminal) => terminal.accept(params),
            None => Err(ClientError::Timeout(params.timeout.as_millis() as u64)),
        }
    }
}

struct SimulatedClient {
    terminal: TerminalHandle,
    open: bool,
}

impl SimulatedClient {
    fn call<T>(
        &mut self,
        operation: Operation,
        f: impl FnOnce(&mut TerminalState) -> T,
    ) -> ClientResult<T> {
        if !self.open {
            return Err(ClientError::transport("connection closed"));
        }
        let mut state = self.terminal.state();
        if let Some(err) = state.failures.get(&operation) {
            return Err(err.clone());
        }
        Ok(f(&mut state))
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.terminal.state().stats.open_connections -= 1;
        }
    }
}

impl DeviceProtocolClient for SimulatedClient {
    fn disconnect(&mut self) -> ClientResult<()> {
        if !self.open {
            return Ok(());
        }
        let failure = self.terminal.state().failures.get(&Operation::Disconnect).cloned();
        if failure.is_none() {
            self.terminal.state().stats.disconnects += 1;
        }
        self.release();
        failure.map_or(Ok(()), Err)
    }

    fn disable_device(&mut self) -> ClientResult<()> {
        self.call(Operation::Disable, |s| {
            s.stats.disables += 1;
            s.stats.enabled = false;
        })
    }

    fn enable_device(&mut self) -> ClientResult<()> {
        self.call(Operation::Enable, |s| {
            s.stats.enables += 1;
            s.stats.enabled = true;
        })
    }

    fn get_users(&mut self) -> ClientResult<Vec<RawUser>> {
        self.call(Operation::GetUsers, |s| s.users.clone())
    }

    fn get_attendance(&mut self) -> ClientResult<Vec<RawAttendance>> {
        self.call(Operation::GetAttendance, |s| s.attendance.clone())
    }

    fn get_device_info(&mut self) -> ClientResult<RawDeviceInfo> {
        self.call(Operation::GetDeviceInfo, |s| s.info.clone())
    }

    fn test_voice(&mut self, index: u8) -> ClientResult<()> {
        self.call(Operation::TestVoice, |s| s.stats.voice_prompts.push(index))
    }

    fn next_live_event(&mut self, wait: Duration) -> ClientResult<Option<RawAttendance>> {
        self.call(Operation::LiveCapture, |_| ())?;

        let deadline = Instant::now() + wait;
        let shared = &self.terminal.shared;
        let mut state = self.terminal.state();
        loop {
            if let Some(event) = state.live.pop_front() {
                return Ok(Some(event));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = shared
                .live_ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn save_user_templates(&mut self, templates: &[UserTemplate]) -> ClientResult<()> {
        self.call(Operation::SaveTemplates, |s| {
            s.stats.templates.extend_from_slice(templates);
        })
    }
}

impl Drop for SimulatedClient {
    fn drop(&mut self) {
        self.release();
    }
}
