//! Simulated hardware scan service.
//!
//! Implements [`ScanService`] in-process for tests and for running the
//! acquisition without a physical device:
//!
//! - Configurable inventory: zero, one or several devices
//! - Per-direction hardware pacer capability
//! - Pacer rate quantisation (`base_clock / round(base_clock / requested)`)
//! - One pacing thread per running scan that fills (input) or consumes
//!   (output) the shared buffer with wrap-around
//! - Analog loopback: the input samples whatever the output is replaying
//! - Fault injection and failing teardown for error-path testing
//! - A journal of every boundary call
//!
//! ```text
//!   start_scan(Input) ──► pacing thread ──► ScanBuffer (wraps)
//!                              ▲
//!                              │ loopback
//!   start_scan(Output) ─► pacing thread ◄── ScanBuffer (replayed)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::error::{AppResult, DaqError};
use crate::hardware::{
    Capabilities, Connection, DeviceDescriptor, Direction, InterfaceKind, ScanService, ScanStatus,
    StatusReport, TransferStatus,
};
use crate::scan::buffer::ScanBuffer;
use crate::scan::config::{ScanConfig, ScanMode};

/// Default pacer base clock (Hz).
pub const DEFAULT_BASE_CLOCK_HZ: f64 = 20_000_000.0;

/// Interval at which pacing threads wake up to transfer samples.
const TICK: Duration = Duration::from_millis(5);

// =============================================================================
// SimulatedDevice
// =============================================================================

/// Description of one simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    descriptor: DeviceDescriptor,
    input_pacer: bool,
    output_pacer: bool,
    connect_succeeds: bool,
    failing_teardown: bool,
    input_channels: u32,
    output_channels: u32,
    max_sample_rate: f64,
    base_clock_hz: f64,
    noise_amplitude: f64,
}

impl SimulatedDevice {
    /// USB device with paced input (8 channels) and output (2 channels).
    pub fn new(product_name: &str, unique_id: &str) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                product_name: product_name.to_string(),
                unique_id: unique_id.to_string(),
                interface: InterfaceKind::Usb,
            },
            input_pacer: true,
            output_pacer: true,
            connect_succeeds: true,
            failing_teardown: false,
            input_channels: 8,
            output_channels: 2,
            max_sample_rate: 500_000.0,
            base_clock_hz: DEFAULT_BASE_CLOCK_HZ,
            noise_amplitude: 0.0,
        }
    }

    /// Attach the device to a different interface.
    pub fn on_interface(mut self, interface: InterfaceKind) -> Self {
        self.descriptor.interface = interface;
        self
    }

    /// Remove the hardware pacer for `direction`.
    pub fn without_pacer(mut self, direction: Direction) -> Self {
        match direction {
            Direction::Input => self.input_pacer = false,
            Direction::Output => self.output_pacer = false,
        }
        self
    }

    /// Connection succeeds but the post-connect check reports disconnected.
    pub fn failing_connect(mut self) -> Self {
        self.connect_succeeds = false;
        self
    }

    /// `stop_scan` and `disconnect` fail; `release` still succeeds.
    pub fn failing_teardown(mut self) -> Self {
        self.failing_teardown = true;
        self
    }

    /// Override the pacer base clock.
    pub fn with_base_clock(mut self, hz: f64) -> Self {
        self.base_clock_hz = hz;
        self
    }

    /// Add uniform noise of the given amplitude (volts) to input samples.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude.abs();
        self
    }

    /// Device identity.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Closest rate the pacer can produce for `requested`.
    pub fn negotiate_rate(&self, requested: f64) -> f64 {
        let divisor = (self.base_clock_hz / requested).round().max(1.0);
        self.base_clock_hz / divisor
    }

    fn has_pacer(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.input_pacer,
            Direction::Output => self.output_pacer,
        }
    }

    fn channels(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new("USB-1608GX-2AO", "01D9A7F1")
    }
}

/// A boundary call recorded by the simulated service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCall {
    /// `enumerate_devices`
    EnumerateDevices,
    /// `connect`
    Connect,
    /// `is_connected`
    IsConnected,
    /// `disconnect`
    Disconnect,
    /// `capabilities`
    Capabilities(Direction),
    /// `start_scan`
    StartScan(Direction),
    /// `scan_status`
    ScanStatus(Direction),
    /// `stop_scan`
    StopScan(Direction),
    /// `release`
    Release,
}

// =============================================================================
// Pacing threads
// =============================================================================

/// Transfer progress shared with a pacing thread.
struct Progress {
    capacity: usize,
    total: AtomicU64,
    finished: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl Progress {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            total: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    fn report(&self) -> StatusReport {
        let total = self.total.load(Ordering::SeqCst);
        let status = if let Some(message) = self.fault.lock().clone() {
            ScanStatus::Error(message)
        } else if self.finished.load(Ordering::SeqCst) {
            ScanStatus::Idle
        } else {
            ScanStatus::Running
        };

        let current_index = if total == 0 || self.capacity == 0 {
            0
        } else {
            ((total - 1) % self.capacity as u64) as usize
        };

        StatusReport {
            status,
            transfer: TransferStatus {
                current_scan_count: total,
                current_total_count: total,
                current_index,
            },
        }
    }
}

/// Output waveform currently being replayed, seen by the input side.
#[derive(Clone)]
struct Loopback {
    buffer: ScanBuffer,
    rate: f64,
    started: Instant,
}

impl Loopback {
    fn sample_at(&self, at: Instant) -> f64 {
        let len = self.buffer.len();
        if len == 0 {
            return 0.0;
        }
        match at.checked_duration_since(self.started) {
            Some(elapsed) => {
                let index = (elapsed.as_secs_f64() * self.rate) as u64 % len as u64;
                self.buffer.get(index as usize).unwrap_or(0.0)
            }
            None => 0.0,
        }
    }
}

type LoopbackSlot = Arc<Mutex<Option<Loopback>>>;

/// One running scan.
struct Worker {
    stop: Arc<AtomicBool>,
    progress: Arc<Progress>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn is_active(&self) -> bool {
        !self.progress.finished.load(Ordering::SeqCst) && self.progress.fault.lock().is_none()
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Simulated pacing thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.halt();
    }
}

struct PacingParams {
    direction: Direction,
    buffer: ScanBuffer,
    rate: f64,
    mode: ScanMode,
    noise: f64,
    seed: u64,
    loopback: LoopbackSlot,
}

fn spawn_pacer(params: PacingParams) -> AppResult<Worker> {
    let stop = Arc::new(AtomicBool::new(false));
    let progress = Arc::new(Progress::new(params.buffer.len()));

    let thread_stop = stop.clone();
    let thread_progress = progress.clone();
    let handle = thread::Builder::new()
        .name(format!("sim-{}-pacer", params.direction))
        .spawn(move || run_pacer(params, thread_stop, thread_progress))
        .map_err(|e| DaqError::Hardware(format!("Failed to spawn pacing thread: {}", e)))?;

    Ok(Worker {
        stop,
        progress,
        handle: Some(handle),
    })
}

fn run_pacer(params: PacingParams, stop: Arc<AtomicBool>, progress: Arc<Progress>) {
    let started = Instant::now();
    let capacity = progress.capacity as u64;
    let mut rng = StdRng::seed_from_u64(params.seed);

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(TICK);

        if progress.fault.lock().is_some() {
            break;
        }

        let due = (started.elapsed().as_secs_f64() * params.rate) as u64;
        let total = progress.total.load(Ordering::SeqCst);
        let mut count = due.saturating_sub(total);
        if params.mode == ScanMode::Finite {
            count = count.min(capacity.saturating_sub(total));
        }

        if count > 0 {
            if params.direction == Direction::Input {
                let loopback = params.loopback.lock().clone();
                let chunk: Vec<f64> = (total..total + count)
                    .map(|n| {
                        let at = started + Duration::from_secs_f64(n as f64 / params.rate);
                        let signal = loopback.as_ref().map_or(0.0, |l| l.sample_at(at));
                        if params.noise > 0.0 {
                            signal + rng.gen_range(-params.noise..=params.noise)
                        } else {
                            signal
                        }
                    })
                    .collect();
                params
                    .buffer
                    .write_wrapping((total % capacity.max(1)) as usize, &chunk);
            }
            progress.total.fetch_add(count, Ordering::SeqCst);
            trace!(direction = %params.direction, count, "Transferred samples");
        }

        if params.mode == ScanMode::Finite && total + count >= capacity {
            progress.finished.store(true, Ordering::SeqCst);
            debug!(direction = %params.direction, "Finite scan complete");
            break;
        }
    }
}

// =============================================================================
// SimulatedScanService
// =============================================================================

struct ConnectionState {
    device: usize,
    connected: bool,
    scans: HashMap<Direction, Worker>,
    loopback: LoopbackSlot,
}

#[derive(Default)]
struct ServiceState {
    next_id: u64,
    connections: HashMap<u64, ConnectionState>,
}

/// In-process [`ScanService`].
///
/// # Example
///
/// ```
/// use scan_daq::hardware::simulated::{SimulatedDevice, SimulatedScanService};
/// use scan_daq::hardware::{InterfaceKind, ScanService};
///
/// let service = SimulatedScanService::with_devices(vec![SimulatedDevice::default()]);
/// let devices = service.enumerate_devices(InterfaceKind::Usb)?;
/// assert_eq!(devices.len(), 1);
/// # Ok::<(), scan_daq::DaqError>(())
/// ```
pub struct SimulatedScanService {
    devices: Vec<SimulatedDevice>,
    state: Mutex<ServiceState>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl SimulatedScanService {
    /// Service with a single default device.
    pub fn new() -> Self {
        Self::with_devices(vec![SimulatedDevice::default()])
    }

    /// Service with no discoverable devices.
    pub fn empty() -> Self {
        Self::with_devices(Vec::new())
    }

    /// Service with the given inventory.
    pub fn with_devices(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            state: Mutex::new(ServiceState::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make every running scan in `direction` report a hardware error.
    ///
    /// Returns the number of scans faulted.
    pub fn inject_fault(&self, direction: Direction, message: &str) -> usize {
        let state = self.state.lock();
        let mut faulted = 0;
        for conn in state.connections.values() {
            if let Some(worker) = conn.scans.get(&direction) {
                if worker.is_active() {
                    *worker.progress.fault.lock() = Some(message.to_string());
                    faulted += 1;
                }
            }
        }
        warn!(direction = %direction, reason = message, faulted, "Injected scan fault");
        faulted
    }

    /// Every boundary call made so far, in order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Number of handles not yet released.
    pub fn open_handles(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of scans currently transferring samples.
    pub fn active_scans(&self) -> usize {
        self.state
            .lock()
            .connections
            .values()
            .flat_map(|c| c.scans.values())
            .filter(|w| w.is_active())
            .count()
    }

    fn record(&self, call: ServiceCall) {
        self.calls.lock().push(call);
    }

    fn invalid_handle(connection: &Connection) -> DaqError {
        DaqError::Hardware(format!("Invalid device handle {}", connection.id()))
    }
}

impl Default for SimulatedScanService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanService for SimulatedScanService {
    fn enumerate_devices(&self, interface: InterfaceKind) -> AppResult<Vec<DeviceDescriptor>> {
        self.record(ServiceCall::EnumerateDevices);
        Ok(self
            .devices
            .iter()
            .filter(|d| interface.matches(d.descriptor.interface))
            .map(|d| d.descriptor.clone())
            .collect())
    }

    fn connect(&self, device: &DeviceDescriptor) -> AppResult<Connection> {
        self.record(ServiceCall::Connect);
        let index = self
            .devices
            .iter()
            .position(|d| &d.descriptor == device)
            .ok_or_else(|| {
                DaqError::Hardware(format!("Unknown device {}", device.dev_string()))
            })?;

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.connections.insert(
            id,
            ConnectionState {
                device: index,
                connected: self.devices[index].connect_succeeds,
                scans: HashMap::new(),
                loopback: Arc::new(Mutex::new(None)),
            },
        );

        info!(device = %device.dev_string(), handle = id, "Simulated device connected");
        Ok(Connection::new(id, device.clone()))
    }

    fn is_connected(&self, connection: &Connection) -> bool {
        self.record(ServiceCall::IsConnected);
        self.state
            .lock()
            .connections
            .get(&connection.id())
            .is_some_and(|c| c.connected)
    }

    fn disconnect(&self, connection: &Connection) -> AppResult<()> {
        self.record(ServiceCall::Disconnect);
        let mut state = self.state.lock();
        let conn = state
            .connections
            .get_mut(&connection.id())
            .ok_or_else(|| Self::invalid_handle(connection))?;

        if self.devices[conn.device].failing_teardown {
            return Err(DaqError::Hardware("Disconnect failed".to_string()));
        }
        conn.connected = false;
        Ok(())
    }

    fn capabilities(
        &self,
        connection: &Connection,
        direction: Direction,
    ) -> AppResult<Capabilities> {
        self.record(ServiceCall::Capabilities(direction));
        let state = self.state.lock();
        let conn = state
            .connections
            .get(&connection.id())
            .ok_or_else(|| Self::invalid_handle(connection))?;
        let device = &self.devices[conn.device];

        Ok(Capabilities {
            has_hardware_pacer: device.has_pacer(direction),
            num_channels: device.channels(direction),
            max_sample_rate: device.max_sample_rate,
        })
    }

    fn start_scan(
        &self,
        connection: &Connection,
        direction: Direction,
        config: &ScanConfig,
        buffer: &ScanBuffer,
    ) -> AppResult<f64> {
        self.record(ServiceCall::StartScan(direction));
        let mut state = self.state.lock();
        let conn = state
            .connections
            .get_mut(&connection.id())
            .ok_or_else(|| Self::invalid_handle(connection))?;
        let device = &self.devices[conn.device];

        if !conn.connected {
            return Err(DaqError::Hardware("Device is not connected".to_string()));
        }
        if !device.has_pacer(direction) {
            return Err(DaqError::Hardware(format!(
                "No hardware pacer for analog {}",
                direction
            )));
        }
        if config.channel() >= device.channels(direction) {
            return Err(DaqError::Hardware(format!(
                "Invalid channel {} for analog {}",
                config.channel(),
                direction
            )));
        }
        if buffer.len() != config.samples_per_channel() {
            return Err(DaqError::Hardware(format!(
                "Buffer holds {} samples, scan expects {}",
                buffer.len(),
                config.samples_per_channel()
            )));
        }
        if conn.scans.get(&direction).is_some_and(Worker::is_active) {
            return Err(DaqError::Hardware(format!(
                "Analog {} scan already running",
                direction
            )));
        }

        let rate = device.negotiate_rate(config.sample_rate());
        if direction == Direction::Output {
            *conn.loopback.lock() = Some(Loopback {
                buffer: buffer.clone(),
                rate,
                started: Instant::now(),
            });
        }

        let worker = spawn_pacer(PacingParams {
            direction,
            buffer: buffer.clone(),
            rate,
            mode: config.mode(),
            noise: device.noise_amplitude,
            seed: connection.id(),
            loopback: conn.loopback.clone(),
        })?;

        // Replacing a finished or faulted worker joins its thread
        conn.scans.insert(direction, worker);

        debug!(direction = %direction, requested = config.sample_rate(), actual = rate, "Simulated scan started");
        Ok(rate)
    }

    fn scan_status(
        &self,
        connection: &Connection,
        direction: Direction,
    ) -> AppResult<StatusReport> {
        self.record(ServiceCall::ScanStatus(direction));
        let state = self.state.lock();
        let conn = state
            .connections
            .get(&connection.id())
            .ok_or_else(|| Self::invalid_handle(connection))?;

        Ok(conn
            .scans
            .get(&direction)
            .map_or_else(StatusReport::idle, |w| w.progress.report()))
    }

    fn stop_scan(&self, connection: &Connection, direction: Direction) -> AppResult<()> {
        self.record(ServiceCall::StopScan(direction));
        let mut state = self.state.lock();
        let conn = state
            .connections
            .get_mut(&connection.id())
            .ok_or_else(|| Self::invalid_handle(connection))?;

        if self.devices[conn.device].failing_teardown {
            return Err(DaqError::Hardware(format!(
                "Failed to stop analog {} scan",
                direction
            )));
        }

        if let Some(mut worker) = conn.scans.remove(&direction) {
            worker.halt();
        }
        if direction == Direction::Output {
            *conn.loopback.lock() = None;
        }
        Ok(())
    }

    fn release(&self, connection: &Connection) -> AppResult<()> {
        self.record(ServiceCall::Release);
        let removed = self.state.lock().connections.remove(&connection.id());
        match removed {
            // Dropping the state joins any pacing thread still running
            Some(_) => {
                info!(handle = connection.id(), "Simulated device released");
                Ok(())
            }
            None => Err(Self::invalid_handle(connection)),
        }
    }
}
