//! Live event capture.
//!
//! A capture holds one terminal for its whole lifetime: the capture loop is
//! the operation of an exclusive bracket, so the terminal is disabled,
//! pulled for punches until a deadline or cancellation, then re-enabled and
//! disconnected.
//!
//! The loop runs on a worker thread. Each punch is handed to the caller's
//! async context through a bounded channel and delivered there, so delivery
//! code (typically a websocket send) never runs on the blocking worker. A
//! consumer that stops reading cannot hold the terminal past the deadline:
//! while the channel is full the loop keeps checking its stop conditions.

use crate::error::{FailureKind, OperationError, Result};
use crate::service::DeviceService;
use crate::session::DeviceSession;
use biogate_core::constants::LIVE_CAPTURE_POLL_MS;
use biogate_core::{DeviceAddress, DeviceCredential, LiveEvent};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_BUFFER: usize = 64;
const SEND_RETRY: Duration = Duration::from_millis(10);

/// Why a capture loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    /// The deadline elapsed
    Deadline,

    /// The cancellation token fired or the service is shutting down
    Cancelled,

    /// Nobody was left to receive events
    ReceiverClosed,
}

/// Worker-side outcome of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    /// Punches pulled from the terminal
    pub received: usize,

    pub exit: CaptureExit,
}

/// Outcome of [`RealtimeEventBridge::stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Punches pulled from the terminal
    pub received: usize,

    /// Punches the callback accepted
    pub delivered: usize,

    /// Punches the callback failed on
    pub delivery_failures: usize,

    pub exit: CaptureExit,
}

/// A running capture, consumed from the caller's context.
#[derive(Debug)]
pub struct LiveCapture {
    address: DeviceAddress,
    events: mpsc::Receiver<LiveEvent>,
    cancel: CancellationToken,
    task: JoinHandle<std::result::Result<CaptureStats, OperationError>>,
}

impl LiveCapture {
    #[must_use]
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Next punch, or `None` once the capture loop has stopped.
    pub async fn next(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    /// Ask the capture loop to stop at its next poll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop consuming and wait for the bracket (including teardown) to end.
    ///
    /// # Errors
    /// The bracket's failure, if any.
    pub async fn finish(mut self) -> std::result::Result<CaptureStats, OperationError> {
        self.events.close();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(OperationError {
                kind: FailureKind::Unavailable,
                address: self.address,
                cause: format!("Worker failure: {e}"),
            }),
        }
    }
}

/// Streams live punches from a terminal to an async consumer.
#[derive(Debug, Clone)]
pub struct RealtimeEventBridge {
    service: DeviceService,
}

impl RealtimeEventBridge {
    pub fn new(service: DeviceService) -> Self {
        Self { service }
    }

    /// Start a capture and return a handle to consume it.
    ///
    /// The capture waits for the terminal like any other operation, then
    /// pulls punches until `deadline` has elapsed, `cancel` fires, the
    /// service shuts down, or the returned handle is dropped.
    pub fn start(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> LiveCapture {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = self.service.clone();
        let target = address.clone();
        let stop = StopSignals {
            cancel: cancel.clone(),
            closing: service.closing().clone(),
            deadline,
        };

        let task = tokio::spawn(async move {
            let device_ip = target.host().to_string();
            service
                .execute(&target, credential, move |session| {
                    capture_loop(session, &device_ip, &stop, &tx)
                })
                .await
        });

        LiveCapture {
            address: address.clone(),
            events: rx,
            cancel,
            task,
        }
    }

    /// Capture punches and hand each to `on_event` in the caller's context.
    ///
    /// A failing `on_event` is logged and counted; the capture continues.
    ///
    /// # Errors
    /// The bracket's failure: connect exhaustion, a device error while
    /// pulling, or a worker failure. Teardown has run by the time this
    /// returns, whatever the outcome.
    pub async fn stream<F, Fut, E>(
        &self,
        address: &DeviceAddress,
        credential: Option<DeviceCredential>,
        deadline: Duration,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> std::result::Result<CaptureSummary, OperationError>
    where
        F: FnMut(LiveEvent) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Display,
    {
        let mut capture = self.start(address, credential, deadline, cancel);
        let mut delivered = 0;
        let mut delivery_failures = 0;

        while let Some(event) = capture.next().await {
            let user_id = event.user_id.clone();
            match on_event(event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    delivery_failures += 1;
                    error!(device = %address, user_id = %user_id, error = %e, "Failed to deliver live event");
                }
            }
        }

        let stats = capture.finish().await?;
        Ok(CaptureSummary {
            received: stats.received,
            delivered,
            delivery_failures,
            exit: stats.exit,
        })
    }
}

struct StopSignals {
    cancel: CancellationToken,
    closing: CancellationToken,
    deadline: Duration,
}

impl StopSignals {
    fn check(&self, started: Instant, events: &mpsc::Sender<LiveEvent>) -> Option<CaptureExit> {
        if self.cancel.is_cancelled() || self.closing.is_cancelled() {
            Some(CaptureExit::Cancelled)
        } else if events.is_closed() {
            Some(CaptureExit::ReceiverClosed)
        } else if started.elapsed() >= self.deadline {
            Some(CaptureExit::Deadline)
        } else {
            None
        }
    }
}

fn capture_loop(
    session: &DeviceSession,
    device_ip: &str,
    stop: &StopSignals,
    events: &mpsc::Sender<LiveEvent>,
) -> Result<CaptureStats> {
    let address = session.address();
    let started = Instant::now();
    let poll = Duration::from_millis(LIVE_CAPTURE_POLL_MS);
    let mut received = 0;

    info!(device = %address, deadline_secs = stop.deadline.as_secs(), "Live capture started");

    let exit = 'capture: loop {
        if let Some(exit) = stop.check(started, events) {
            break exit;
        }

        let wait = poll.min(stop.deadline.saturating_sub(started.elapsed()));
        let Some(raw) = session.with_client(|c| c.next_live_event(wait))? else {
            continue;
        };
        received += 1;
        debug!(device = %address, user_id = %raw.user_id, "Live event received");

        let mut event = raw.into_live_event(device_ip);
        loop {
            match events.try_send(event) {
                Ok(()) => break,
                Err(TrySendError::Closed(_)) => {
                    warn!(device = %address, "Live event consumer went away");
                    break 'capture CaptureExit::ReceiverClosed;
                }
                Err(TrySendError::Full(pending)) => {
                    if let Some(exit) = stop.check(started, events) {
                        debug!(device = %address, user_id = %pending.user_id, "Live event dropped, consumer is behind");
                        break 'capture exit;
                    }
                    event = pending;
                    std::thread::sleep(SEND_RETRY);
                }
            }
        }
    };

    info!(device = %address, received, exit = ?exit, "Live capture stopped");
    Ok(CaptureStats { received, exit })
}
