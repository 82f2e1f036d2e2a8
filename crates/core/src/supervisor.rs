//! Connection supervisor: owns one managed device, runs all of its I/O on a
//! dedicated worker thread, and keeps it connected.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!                                 \--fail--> Error
//! Connected --health/command failure--> Reconnecting --ok--> Connected
//!                                             \--attempts exhausted--> Error
//! any --disconnect--> Disconnected
//! ```
//!
//! Caller-facing methods block on a reply from the worker. The worker is a
//! current-thread tokio runtime that selects between incoming requests and
//! the single pending [`Task`] (health check or reconnect attempt), so
//! `disconnect` cancels pending timers structurally before it releases the
//! handle. Device slot state (handle, metrics, state) lives behind one mutex.

use crate::config::SupervisorConfig;
use crate::connector::{self, CancelToken, ConnectOptions, Connected, ConnectionHandle, Strategy};
use crate::device::{self, DeviceDescriptor};
use crate::dispatch::{self, ErrorClass, TransferMethod};
use crate::error::{Error, Result};
use crate::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::protocol::{LightingMode, ProtocolCommand, VendorProtocol};
use crate::safety;
use crate::scheduler::{reconnect_delay, Scheduler, Task};
use crate::setting::Setting;
use crate::transport::Backend;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Error => "Error",
        })
    }
}

type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Observers {
    state: Vec<StateObserver>,
    error: Vec<ErrorObserver>,
}

struct DeviceSlot {
    state: ConnectionState,
    descriptor: Option<DeviceDescriptor>,
    handle: Option<ConnectionHandle>,
    strategy: Option<Strategy>,
    metrics: ConnectionMetrics,
}

struct Shared {
    slot: Mutex<DeviceSlot>,
    observers: RwLock<Observers>,
}

impl Shared {
    fn new() -> Self {
        Self {
            slot: Mutex::new(DeviceSlot {
                state: ConnectionState::Disconnected,
                descriptor: None,
                handle: None,
                strategy: None,
                metrics: ConnectionMetrics::default(),
            }),
            observers: RwLock::new(Observers::default()),
        }
    }

    fn slot(&self) -> MutexGuard<'_, DeviceSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.slot().state, state);
        if previous == state {
            return;
        }
        info!(from = %previous, to = %state, "Connection state changed");

        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(state))).is_err() {
                error!("State observer panicked");
            }
        }
    }

    fn notify_error(&self, message: &str) {
        warn!(error = message, "Device error");
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .error
            .clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(message))).is_err() {
                error!("Error observer panicked");
            }
        }
    }

    /// Record `message` as the last error and notify observers.
    fn fail(&self, message: String) {
        self.slot().metrics.last_error = Some(message.clone());
        self.notify_error(&message);
    }
}

enum Request {
    Scan(oneshot::Sender<Vec<DeviceDescriptor>>),
    Connect(DeviceDescriptor, oneshot::Sender<Result<Strategy>>),
    Disconnect(oneshot::Sender<()>),
    Send(ProtocolCommand, oneshot::Sender<Result<TransferMethod>>),
    Probe(oneshot::Sender<Result<()>>),
    ForceReconnect(oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Handle to one supervised device.
pub struct Supervisor {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<Request>,
    cancel: CancelToken,
    worker: Option<thread::JoinHandle<()>>,
}

impl Supervisor {
    /// Start the worker thread. Every event it logs is recorded inside `span`.
    pub fn new(backend: Arc<dyn Backend>, config: SupervisorConfig, span: Span) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let cancel = CancelToken::new();
        let (requests, receiver) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::Worker(format!("runtime: {e}")))?;
        let worker = Worker {
            backend,
            config,
            shared: shared.clone(),
            cancel: cancel.clone(),
            scheduler: Scheduler::new(),
        };
        let handle = thread::Builder::new()
            .name("open-mouse-supervisor".to_string())
            .spawn(move || runtime.block_on(worker.run(receiver).instrument(span)))
            .map_err(|e| Error::Worker(format!("spawn: {e}")))?;

        Ok(Self {
            shared,
            requests,
            cancel,
            worker: Some(handle),
        })
    }

    fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        // The worker cannot answer while it is running the caller's observer.
        if on_worker_thread() {
            return Err(Error::Worker(
                "called from an observer on the worker thread".into(),
            ));
        }
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .map_err(|_| Error::Worker("worker has stopped".into()))?;
        response
            .blocking_recv()
            .map_err(|_| Error::Worker("request dropped".into()))
    }

    /// Scan the bus on the worker thread.
    pub fn scan_devices(&self) -> Vec<DeviceDescriptor> {
        self.request(Request::Scan).unwrap_or_else(|e| {
            warn!(error = %e, "Scan failed");
            Vec::new()
        })
    }

    /// Connect to `descriptor`, returning the strategy that worked.
    pub fn try_connect(&self, descriptor: &DeviceDescriptor) -> Result<Strategy> {
        self.cancel.reset();
        self.request(|reply| Request::Connect(descriptor.clone(), reply))?
    }

    pub fn connect(&self, descriptor: &DeviceDescriptor) -> bool {
        self.try_connect(descriptor).is_ok()
    }

    /// Cancel any in-flight connect or pending timer, then release the device.
    pub fn disconnect(&self) {
        if on_worker_thread() {
            warn!("Disconnect ignored, called from an observer on the worker thread");
            return;
        }
        self.cancel.cancel();
        if let Err(e) = self.request(Request::Disconnect) {
            warn!(error = %e, "Disconnect request failed");
        }
    }

    /// Probe the open handle without changing state.
    pub fn test_connection(&self) -> bool {
        matches!(self.request(Request::Probe), Ok(Ok(())))
    }

    /// Drop the current handle and run the reconnect sequence now.
    pub fn force_reconnect(&self) -> Result<()> {
        self.request(Request::ForceReconnect)?
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.slot().state
    }

    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.shared.slot().descriptor.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.slot().metrics.snapshot()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.slot().metrics.last_error.clone()
    }

    /// Human-readable description of the open connection.
    pub fn get_connection_info(&self) -> Vec<String> {
        let slot = self.shared.slot();
        let mut lines = Vec::new();
        if let Some(descriptor) = &slot.descriptor {
            lines.push(format!("Device: {descriptor}"));
            lines.push(format!("Protocol: {}", descriptor.protocol));
        }
        lines.push(format!("State: {}", slot.state));
        if let Some(method) = &slot.metrics.connection_method {
            lines.push(format!("Connection Method: {method}"));
        }
        if let Some(handle) = &slot.handle {
            lines.extend(handle.info_lines());
        }
        lines
    }

    /// Register a state-change observer.
    ///
    /// Observers run on the worker thread. Methods that wait for the worker
    /// (`connect`, `disconnect`, `scan_devices`, `test_connection`,
    /// `force_reconnect` and every command) return an error or `false` when
    /// called from inside an observer. Accessors such as [`Supervisor::state`]
    /// and [`Supervisor::metrics`] are safe to call.
    pub fn on_state_change(&self, observer: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .push(Arc::new(observer));
    }

    /// Register an error observer. Runs on the worker thread under the same
    /// rules as [`Supervisor::on_state_change`].
    pub fn on_error(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .error
            .push(Arc::new(observer));
    }

    /// Send an encoded command. Rejected without touching the handle unless
    /// the device is connected.
    pub fn try_send(&self, command: ProtocolCommand) -> Result<TransferMethod> {
        if self.state() != ConnectionState::Connected {
            debug!(kind = %command.kind(), "Command rejected, not connected");
            return Err(Error::NotConnected);
        }
        self.request(|reply| Request::Send(command, reply))?
    }

    pub fn send_command(&self, command: ProtocolCommand) -> bool {
        self.try_send(command).is_ok()
    }

    fn protocol(&self) -> Result<VendorProtocol> {
        let slot = self.shared.slot();
        match (&slot.descriptor, slot.state) {
            (Some(descriptor), ConnectionState::Connected) => Ok(descriptor.protocol),
            _ => Err(Error::NotConnected),
        }
    }

    /// Validate, encode and send a setting.
    pub fn try_apply(&self, setting: &Setting) -> Result<TransferMethod> {
        let protocol = self.protocol()?;
        let command = setting.encode(protocol).map_err(|e| {
            self.shared.fail(format!("Rejected {setting}: {e}"));
            e
        })?;
        debug!(%setting, protocol = %protocol, "Applying setting");
        self.try_send(command)
    }

    pub fn apply(&self, setting: &Setting) -> bool {
        self.try_apply(setting).is_ok()
    }

    pub fn set_dpi(&self, dpi: u16) -> bool {
        self.apply(&Setting::Dpi(dpi))
    }

    pub fn set_dpi_stages(&self, stages: &[u16]) -> bool {
        self.apply(&Setting::DpiStages(stages.to_vec()))
    }

    pub fn set_polling_rate(&self, hz: u16) -> bool {
        self.apply(&Setting::PollingRate(hz))
    }

    pub fn set_rgb(&self, color: &str, mode: LightingMode, brightness: u8, speed: u8) -> bool {
        self.apply(&Setting::Rgb {
            color: color.to_string(),
            mode,
            brightness,
            speed,
        })
    }

    pub fn set_lod(&self, mm: u8) -> bool {
        self.apply(&Setting::LiftOffDistance(mm))
    }

    pub fn set_angle_snapping(&self, enabled: bool) -> bool {
        self.apply(&Setting::AngleSnapping(enabled))
    }

    pub fn set_debounce(&self, ms: u8) -> bool {
        self.apply(&Setting::Debounce(ms))
    }

    pub fn set_button_mapping(&self, button: u8, action: u8) -> bool {
        self.apply(&Setting::ButtonMapping { button, action })
    }

    /// Ask the firmware for its version. The reply is not read back.
    pub fn request_firmware_version(&self) -> Result<TransferMethod> {
        let command = self.protocol()?.get_firmware_version()?;
        self.try_send(command)
    }

    /// Switch the device into its bootloader. Requires `acknowledged`.
    pub fn enter_dfu_mode(&self, acknowledged: bool) -> Result<TransferMethod> {
        safety::confirm_firmware_mode(acknowledged)?;
        let command = self.protocol()?.enter_dfu_mode()?;
        warn!("{}", safety::BRICKING_DISCLAIMER);
        self.try_send(command)
    }

    /// Leave the bootloader. Requires `acknowledged`.
    pub fn exit_dfu_mode(&self, acknowledged: bool) -> Result<TransferMethod> {
        safety::confirm_firmware_mode(acknowledged)?;
        let command = self.protocol()?.exit_dfu_mode()?;
        self.try_send(command)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = self.requests.send(Request::Shutdown);
        if let Some(worker) = self.worker.take() {
            // Dropped by an observer: the worker exits once its loop sees Shutdown.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("Supervisor worker panicked");
            }
        }
    }
}

/// True inside a tokio runtime (the worker's included), where blocking on a
/// reply would panic.
fn on_worker_thread() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

struct Worker {
    backend: Arc<dyn Backend>,
    config: SupervisorConfig,
    shared: Arc<Shared>,
    cancel: CancelToken,
    scheduler: Scheduler,
}

impl Worker {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        debug!("Supervisor worker started");
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    None | Some(Request::Shutdown) => break,
                    Some(request) => self.handle_guarded(request),
                },
                task = self.scheduler.next() => self.run_task(task),
            }
        }
        self.scheduler.cancel();
        self.release_handle();
        self.shared.set_state(ConnectionState::Disconnected);
        debug!("Supervisor worker stopped");
    }

    fn handle_guarded(&mut self, request: Request) {
        if catch_unwind(AssertUnwindSafe(|| self.handle(request))).is_err() {
            error!("Panic while handling supervisor request");
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Scan(reply) => {
                let _ = reply.send(device::scan(self.backend.as_ref()));
            }
            Request::Connect(descriptor, reply) => {
                let _ = reply.send(self.connect(descriptor));
            }
            Request::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Request::Send(command, reply) => {
                let _ = reply.send(self.send(&command));
            }
            Request::Probe(reply) => {
                let _ = reply.send(self.probe());
            }
            Request::ForceReconnect(reply) => {
                let _ = reply.send(self.force_reconnect());
            }
            Request::Shutdown => {}
        }
    }

    fn run_task(&mut self, task: Task) {
        trace!(?task, "Scheduled task due");
        match task {
            Task::HealthCheck => self.health_check(),
            Task::Reconnect { attempt } => self.attempt_reconnect(attempt),
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            reset_settle: self.config.reset_settle(),
        }
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Connected> {
        connector::connect(
            self.backend.as_ref(),
            descriptor,
            &self.connect_options(),
            &self.cancel,
        )
    }

    fn install(&self, connected: Connected) {
        let mut slot = self.shared.slot();
        slot.metrics.mark_connected(connected.strategy.name());
        slot.strategy = Some(connected.strategy);
        slot.handle = Some(connected.handle);
    }

    fn release_handle(&self) {
        let mut slot = self.shared.slot();
        if let Some(mut handle) = slot.handle.take() {
            handle.close();
            debug!("Connection handle released");
        }
        slot.strategy = None;
        slot.metrics.mark_disconnected();
    }

    fn schedule_health_check(&mut self) {
        self.scheduler
            .schedule(Task::HealthCheck, self.config.health_check_interval());
    }

    fn connect(&mut self, descriptor: DeviceDescriptor) -> Result<Strategy> {
        {
            let slot = self.shared.slot();
            if slot.state == ConnectionState::Connected
                && slot.descriptor.as_ref() == Some(&descriptor)
            {
                if let Some(strategy) = slot.strategy {
                    debug!("Already connected");
                    return Ok(strategy);
                }
            }
        }

        self.scheduler.cancel();
        self.release_handle();
        self.shared.slot().descriptor = Some(descriptor.clone());
        self.shared.set_state(ConnectionState::Connecting);

        match self.open(&descriptor) {
            Ok(connected) => {
                let strategy = connected.strategy;
                self.install(connected);
                self.shared.set_state(ConnectionState::Connected);
                self.schedule_health_check();
                Ok(strategy)
            }
            Err(Error::Cancelled) => {
                self.shared.slot().descriptor = None;
                self.shared.set_state(ConnectionState::Disconnected);
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.shared.slot().metrics.record_error(e.to_string());
                self.shared.set_state(ConnectionState::Error);
                self.shared.notify_error(&format!("Connection failed: {e}"));
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        self.scheduler.cancel();
        self.release_handle();
        self.shared.slot().descriptor = None;
        self.shared.set_state(ConnectionState::Disconnected);
        self.cancel.reset();
        info!("Disconnected");
    }

    /// Run `io` on the open handle with the slot unlocked, so accessors
    /// stay responsive through retries and delays. Only the worker takes or
    /// installs handles.
    fn with_handle<T>(&self, io: impl FnOnce(&ConnectionHandle) -> Result<T>) -> Result<T> {
        let handle = {
            let mut slot = self.shared.slot();
            if slot.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            slot.handle.take().ok_or(Error::NotConnected)?
        };
        let result = io(&handle);
        self.shared.slot().handle = Some(handle);
        result
    }

    fn send(&mut self, command: &ProtocolCommand) -> Result<TransferMethod> {
        let started = Instant::now();
        let result = self.with_handle(|handle| {
            dispatch::send(
                handle,
                command,
                self.config.command_retries,
                &self.config.dispatch,
            )
        });
        if matches!(result, Err(Error::NotConnected)) {
            return result;
        }

        let mut slot = self.shared.slot();
        slot.metrics.record_command(result.is_ok(), started.elapsed());

        let error = match &result {
            Ok(method) => {
                debug!(kind = %command.kind(), method = method.name(), "Command sent");
                None
            }
            Err(e) => Some(e.to_string()),
        };
        let Some(error) = error else {
            return result;
        };
        slot.metrics.record_error(error.clone());
        let consecutive = slot.metrics.consecutive_errors;
        drop(slot);

        self.shared
            .notify_error(&format!("Command '{}' failed: {error}", command.kind()));
        if consecutive >= self.config.max_consecutive_errors {
            warn!(consecutive, "Too many consecutive command failures");
            self.begin_reconnect();
        }
        result
    }

    fn probe(&self) -> Result<()> {
        self.with_handle(ConnectionHandle::probe)
    }

    fn health_check(&mut self) {
        if self.shared.slot().state != ConnectionState::Connected {
            return;
        }
        let started = Instant::now();
        let outcome = self.probe();
        {
            let mut slot = self.shared.slot();
            slot.metrics.record_health(started.elapsed());
            if let Err(e) = &outcome {
                slot.metrics.record_error(e.to_string());
            }
        }

        match outcome {
            Ok(()) => {
                trace!("Health check passed");
                self.schedule_health_check();
            }
            Err(e) => {
                let class = ErrorClass::classify(&e);
                warn!(?class, error = %e, "Health check failed");
                self.shared.notify_error(&format!("Health check failed: {e}"));
                self.begin_reconnect();
            }
        }
    }

    fn begin_reconnect(&mut self) {
        if !self.config.auto_reconnect {
            self.scheduler.cancel();
            self.release_handle();
            self.shared.set_state(ConnectionState::Error);
            self.shared
                .fail("Connection lost and automatic reconnection is disabled".into());
            return;
        }
        if matches!(self.scheduler.pending(), Some(Task::Reconnect { .. })) {
            return;
        }
        self.shared.set_state(ConnectionState::Reconnecting);
        self.scheduler.schedule(
            Task::Reconnect { attempt: 0 },
            reconnect_delay(self.config.reconnect_base_delay(), 0),
        );
    }

    fn force_reconnect(&mut self) -> Result<()> {
        if self.shared.slot().descriptor.is_none() {
            return Err(Error::NotConnected);
        }
        info!("Forced reconnect requested");
        self.scheduler.cancel();
        self.release_handle();
        self.shared.set_state(ConnectionState::Reconnecting);
        self.scheduler
            .schedule(Task::Reconnect { attempt: 0 }, Duration::ZERO);
        Ok(())
    }

    fn attempt_reconnect(&mut self, attempt: u32) {
        let Some(descriptor) = self.shared.slot().descriptor.clone() else {
            self.shared.set_state(ConnectionState::Disconnected);
            return;
        };
        let max = self.config.max_reconnect_attempts.max(1);
        info!(attempt = attempt + 1, max, "Attempting reconnection");

        self.release_handle();
        let opened = match self.open(&descriptor) {
            Err(_) if self.cancel.is_cancelled() => Err(Error::Cancelled),
            opened => opened,
        };
        match opened {
            Ok(connected) => {
                self.install(connected);
                self.shared.slot().metrics.reconnect_count += 1;
                self.shared.set_state(ConnectionState::Connected);
                self.schedule_health_check();
            }
            Err(Error::Cancelled) => {
                self.shared.set_state(ConnectionState::Disconnected);
            }
            Err(e) => {
                debug!(attempt = attempt + 1, error = %e, "Reconnection attempt failed");
                let next = attempt + 1;
                if next < max {
                    self.scheduler.schedule(
                        Task::Reconnect { attempt: next },
                        reconnect_delay(self.config.reconnect_base_delay(), next),
                    );
                } else {
                    self.shared.set_state(ConnectionState::Error);
                    self.shared
                        .fail(format!("Reconnection failed after {max} attempts: {e}"));
                }
            }
        }
    }
}
