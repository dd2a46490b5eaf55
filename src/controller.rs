//! Acquisition controller: one device, one input scan, one output scan.
//!
//! The controller owns the device handle and both [`ScanSession`]s and is
//! the single release point for everything the hardware holds on their
//! behalf. [`AcquisitionController::shutdown`] never fails, may be called
//! any number of times, and also runs when the controller is dropped, so
//! every exit path (including `?` early returns and panics) tears the
//! device down.
//!
//! ```no_run
//! use std::sync::Arc;
//! use scan_daq::controller::AcquisitionController;
//! use scan_daq::hardware::simulated::SimulatedScanService;
//! use scan_daq::scan::ScanConfig;
//! use scan_daq::waveform::WaveformShape;
//!
//! # fn main() -> scan_daq::AppResult<()> {
//! let mut daq = AcquisitionController::connect(
//!     Arc::new(SimulatedScanService::new()),
//!     ScanConfig::input().build()?,
//!     ScanConfig::output().build()?,
//! )?;
//! daq.start_output_waveform(WaveformShape::Triangle, 1.0, 0.0)?;
//! daq.start_input()?;
//! let (input_running, output_running) = daq.poll_both()?;
//! let snapshot = daq.read_input_snapshot()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DaqConfig;
use crate::error::{AppResult, DaqError};
use crate::filter::{apply, design, FilterCoefficients, FilterFamily, FilterSpec};
use crate::hardware::{Connection, Direction, InterfaceKind, ScanService};
use crate::processor::ProcessingPipeline;
use crate::scan::config::ScanConfig;
use crate::scan::session::{ScanSession, ScanState};
use crate::waveform::{generate, WaveformShape};

/// Owns the device and both scan sessions.
pub struct AcquisitionController {
    service: Arc<dyn ScanService>,
    interface: InterfaceKind,
    input_config: ScanConfig,
    output_config: ScanConfig,
    connection: Option<Connection>,
    input: Option<ScanSession>,
    output: Option<ScanSession>,
}

impl AcquisitionController {
    /// Create an uninitialised controller. No hardware call is made.
    pub fn new(
        service: Arc<dyn ScanService>,
        input_config: ScanConfig,
        output_config: ScanConfig,
    ) -> Self {
        Self {
            service,
            interface: InterfaceKind::default(),
            input_config,
            output_config,
            connection: None,
            input: None,
            output: None,
        }
    }

    /// Create a controller from the loaded configuration.
    pub fn from_config(service: Arc<dyn ScanService>, config: &DaqConfig) -> AppResult<Self> {
        Ok(Self::new(service, config.input_scan_config()?, config.output_scan_config()?)
            .with_interface(config.acquisition.interface))
    }

    /// Discover devices on `interface` instead of USB.
    pub fn with_interface(mut self, interface: InterfaceKind) -> Self {
        self.interface = interface;
        self
    }

    /// Create and initialise a controller.
    ///
    /// On failure the partially initialised controller is dropped, which
    /// releases whatever was acquired before the error.
    pub fn connect(
        service: Arc<dyn ScanService>,
        input_config: ScanConfig,
        output_config: ScanConfig,
    ) -> AppResult<Self> {
        let mut controller = Self::new(service, input_config, output_config);
        controller.initialize()?;
        Ok(controller)
    }

    /// Bring up exactly one device with hardware pacers in both directions.
    ///
    /// Fails with [`DaqError::NoDeviceFound`] or [`DaqError::AmbiguousDevice`]
    /// unless exactly one device is visible, [`DaqError::ConnectionFailed`] if
    /// the post-connect check fails, and [`DaqError::UnsupportedCapability`]
    /// if either direction lacks a hardware pacer. Call
    /// [`shutdown`](Self::shutdown) afterwards in every case.
    pub fn initialize(&mut self) -> AppResult<()> {
        if self.connection.is_some() {
            return Err(DaqError::InvalidState {
                operation: "initialize the controller",
                state: "already initialized".to_string(),
            });
        }

        let mut devices = self.service.enumerate_devices(self.interface)?;
        let device = match devices.len() {
            0 => return Err(DaqError::NoDeviceFound),
            1 => devices.remove(0),
            count => return Err(DaqError::AmbiguousDevice { count }),
        };
        info!(device = %device.dev_string(), "Found DAQ device");

        let connection = self.service.connect(&device)?;
        // Held before any further check so shutdown can release it
        self.connection = Some(connection.clone());

        if !self.service.is_connected(&connection) {
            return Err(DaqError::ConnectionFailed(device.dev_string()));
        }

        for direction in [Direction::Input, Direction::Output] {
            let caps = self.service.capabilities(&connection, direction)?;
            if !caps.has_hardware_pacer {
                return Err(DaqError::UnsupportedCapability { direction });
            }
        }

        info!(device = %device.dev_string(), "DAQ device initialized");
        Ok(())
    }

    /// Whether a device handle is held.
    pub fn is_initialized(&self) -> bool {
        self.connection.is_some()
    }

    /// Handle of the connected device.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Arm, load and start the output scan with `samples`.
    ///
    /// `samples` must hold exactly `samples_per_channel` values. Rejected
    /// with [`DaqError::InvalidState`] while an output scan is running; a
    /// stopped or faulted output session is replaced by a fresh one.
    pub fn start_output(&mut self, samples: &[f64]) -> AppResult<f64> {
        let config = self.output_config.clone();
        let session = self.fresh_session(Direction::Output)?;
        session.arm(config)?;
        session.load_output(samples)?;
        session.start()
    }

    /// Start the output scan with a generated waveform sized to the buffer.
    pub fn start_output_waveform(
        &mut self,
        shape: WaveformShape,
        amplitude: f64,
        offset: f64,
    ) -> AppResult<f64> {
        let samples = generate(
            shape,
            amplitude,
            offset,
            self.output_config.samples_per_channel(),
        );
        debug!(%shape, amplitude, offset, "Generated output waveform");
        self.start_output(&samples)
    }

    /// Arm and start the input scan.
    ///
    /// Rejected with [`DaqError::InvalidState`] while an input scan is
    /// running; a stopped or faulted input session is replaced.
    pub fn start_input(&mut self) -> AppResult<f64> {
        let config = self.input_config.clone();
        let session = self.fresh_session(Direction::Input)?;
        session.arm(config)?;
        session.start()
    }

    /// Poll both sessions once.
    ///
    /// Returns `(input_running, output_running)`. Both sessions are polled
    /// even if the first reports a fault; the first error is returned.
    pub fn poll_both(&mut self) -> AppResult<(bool, bool)> {
        let input = Self::poll_session(self.input.as_mut());
        let output = Self::poll_session(self.output.as_mut());
        Ok((input?, output?))
    }

    /// Copy of the input buffer. Best-effort while the scan runs: the copy
    /// may straddle a wrap boundary.
    pub fn read_input_snapshot(&self) -> AppResult<Vec<f64>> {
        self.input
            .as_ref()
            .ok_or_else(|| Self::not_started(Direction::Input, "read the input buffer"))?
            .snapshot()
    }

    /// Mean of the input buffer; `None` before the input scan exists.
    pub fn input_average(&self) -> Option<f64> {
        self.input.as_ref().and_then(ScanSession::mean)
    }

    /// Rate the input pacer achieved.
    pub fn actual_input_rate(&self) -> Option<f64> {
        self.input.as_ref().and_then(ScanSession::actual_rate)
    }

    /// Rate the output pacer achieved.
    pub fn actual_output_rate(&self) -> Option<f64> {
        self.output.as_ref().and_then(ScanSession::actual_rate)
    }

    /// State of the input session, if one exists.
    pub fn input_state(&self) -> Option<ScanState> {
        self.input.as_ref().map(ScanSession::state)
    }

    /// State of the output session, if one exists.
    pub fn output_state(&self) -> Option<ScanState> {
        self.output.as_ref().map(ScanSession::state)
    }

    /// Design a filter for the input stream at the achieved input rate.
    pub fn design_input_filter(
        &self,
        family: FilterFamily,
        order: usize,
    ) -> AppResult<FilterCoefficients> {
        let sampling_rate = self
            .actual_input_rate()
            .ok_or_else(|| Self::not_started(Direction::Input, "design an input filter"))?;
        design(&FilterSpec {
            family,
            sampling_rate,
            order,
        })
    }

    /// Zero-phase filter the current input snapshot at the achieved rate.
    pub fn filter_input_snapshot(&self, family: FilterFamily, order: usize) -> AppResult<Vec<f64>> {
        let coefficients = self.design_input_filter(family, order)?;
        apply(&coefficients, &self.read_input_snapshot()?)
    }

    /// Run the current input snapshot through `pipeline`.
    pub fn process_input_snapshot(&self, pipeline: &ProcessingPipeline) -> AppResult<Vec<f64>> {
        pipeline.run(&self.read_input_snapshot()?)
    }

    /// Stop the input scan.
    pub fn stop_input(&mut self) -> AppResult<()> {
        self.input
            .as_mut()
            .ok_or_else(|| Self::not_started(Direction::Input, "stop the input scan"))?
            .stop()
    }

    /// Stop the output scan.
    pub fn stop_output(&mut self) -> AppResult<()> {
        self.output
            .as_mut()
            .ok_or_else(|| Self::not_started(Direction::Output, "stop the output scan"))?
            .stop()
    }

    /// Tear everything down. Never fails and is idempotent.
    ///
    /// Stops both scans, disconnects if connected and releases the device
    /// handle. Each failure is logged and the remaining steps still run.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.shutdown_report() {
            warn!(error = %e, "Shutdown completed with errors");
        }
    }

    /// [`shutdown`](Self::shutdown), returning the collected teardown
    /// failures as [`DaqError::ShutdownFailed`].
    pub fn shutdown_report(&mut self) -> AppResult<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        let mut errors = Vec::new();

        for session in [self.input.as_mut(), self.output.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = session.halt() {
                warn!(direction = %session.direction(), error = %e, "Failed to stop scan during shutdown");
                errors.push(e);
            }
        }

        if self.service.is_connected(&connection) {
            if let Err(e) = self.service.disconnect(&connection) {
                warn!(error = %e, "Failed to disconnect DAQ device");
                errors.push(e);
            }
        }

        if let Err(e) = self.service.release(&connection) {
            warn!(error = %e, "Failed to release DAQ device");
            errors.push(e);
        }

        info!(
            device = %connection.descriptor().dev_string(),
            failures = errors.len(),
            "DAQ device released"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }

    fn poll_session(session: Option<&mut ScanSession>) -> AppResult<bool> {
        match session {
            Some(session) => Ok(session.poll()? == ScanState::Running),
            None => Ok(false),
        }
    }

    /// Replace the session for `direction` with a new idle one.
    fn fresh_session(&mut self, direction: Direction) -> AppResult<&mut ScanSession> {
        let connection = self
            .connection
            .clone()
            .ok_or_else(|| DaqError::InvalidState {
                operation: "start a scan",
                state: "not initialized".to_string(),
            })?;

        let slot = match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        };

        if let Some(previous) = slot.as_mut() {
            if previous.is_running() {
                return Err(DaqError::InvalidState {
                    operation: "start a scan",
                    state: format!("the analog {} scan is running", direction),
                });
            }
            if let Err(e) = previous.halt() {
                warn!(direction = %direction, error = %e, "Failed to release previous scan");
            }
        }

        Ok(slot.insert(ScanSession::new(
            direction,
            self.service.clone(),
            connection,
        )))
    }

    fn not_started(direction: Direction, operation: &'static str) -> DaqError {
        DaqError::InvalidState {
            operation,
            state: format!("no analog {} scan exists", direction),
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("interface", &self.interface)
            .field("connection", &self.connection.as_ref().map(Connection::id))
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::{ServiceCall, SimulatedDevice, SimulatedScanService};
    use std::time::Duration;

    fn small_configs() -> (ScanConfig, ScanConfig) {
        (
            ScanConfig::input().samples_per_channel(256).build().unwrap(),
            ScanConfig::output().samples_per_channel(128).build().unwrap(),
        )
    }

    fn controller(service: &Arc<SimulatedScanService>) -> AcquisitionController {
        let (input, output) = small_configs();
        AcquisitionController::new(service.clone(), input, output)
    }

    fn count(service: &SimulatedScanService, call: ServiceCall) -> usize {
        service.calls().iter().filter(|&&c| c == call).count()
    }

    #[test]
    fn test_no_device_found() {
        let service = Arc::new(SimulatedScanService::empty());
        let mut daq = controller(&service);
        assert!(matches!(daq.initialize(), Err(DaqError::NoDeviceFound)));
        assert!(daq.shutdown_report().is_ok());
        daq.shutdown();
        assert_eq!(count(&service, ServiceCall::Release), 0);
    }

    #[test]
    fn test_ambiguous_device() {
        let service = Arc::new(SimulatedScanService::with_devices(vec![
            SimulatedDevice::new("USB-1608GX-2AO", "A"),
            SimulatedDevice::new("USB-1608GX-2AO", "B"),
        ]));
        let mut daq = controller(&service);
        assert!(matches!(
            daq.initialize(),
            Err(DaqError::AmbiguousDevice { count: 2 })
        ));
        assert!(!daq.is_initialized());
    }

    #[test]
    fn test_missing_pacer_releases_handle() {
        let service = Arc::new(SimulatedScanService::with_devices(vec![
            SimulatedDevice::default().without_pacer(Direction::Output),
        ]));
        let mut daq = controller(&service);
        assert!(matches!(
            daq.initialize(),
            Err(DaqError::UnsupportedCapability {
                direction: Direction::Output
            })
        ));
        daq.shutdown();
        assert_eq!(service.open_handles(), 0);
        assert_eq!(count(&service, ServiceCall::Disconnect), 1);
    }

    #[test]
    fn test_connection_check_failure() {
        let service = Arc::new(SimulatedScanService::with_devices(vec![
            SimulatedDevice::default().failing_connect(),
        ]));
        let (input, output) = small_configs();
        let result = AcquisitionController::connect(service.clone(), input, output);
        assert!(matches!(result, Err(DaqError::ConnectionFailed(_))));
        // Dropped controller released the handle without disconnecting
        assert_eq!(service.open_handles(), 0);
        assert_eq!(count(&service, ServiceCall::Disconnect), 0);
    }

    #[test]
    fn test_start_requires_initialize() {
        let service = Arc::new(SimulatedScanService::new());
        let mut daq = controller(&service);
        assert!(matches!(
            daq.start_input(),
            Err(DaqError::InvalidState { .. })
        ));
        assert!(daq.read_input_snapshot().is_err());
        assert_eq!(daq.input_average(), None);
    }

    #[test]
    fn test_second_start_rejected_while_running() {
        let service = Arc::new(SimulatedScanService::new());
        let mut daq = controller(&service);
        daq.initialize().unwrap();
        daq.start_input().unwrap();

        assert!(matches!(
            daq.start_input(),
            Err(DaqError::InvalidState { .. })
        ));
        assert_eq!(count(&service, ServiceCall::StartScan(Direction::Input)), 1);
        assert_eq!(daq.input_state(), Some(ScanState::Running));
    }

    #[test]
    fn test_output_waveform_length_must_match() {
        let service = Arc::new(SimulatedScanService::new());
        let mut daq = controller(&service);
        daq.initialize().unwrap();
        assert!(matches!(
            daq.start_output(&[0.0; 3]),
            Err(DaqError::InvalidScanConfig(_))
        ));
        assert_eq!(daq.output_state(), Some(ScanState::Armed));

        // The armed session is replaced by the next start
        daq.start_output_waveform(WaveformShape::Sine, 1.0, 0.0)
            .unwrap();
        assert_eq!(daq.output_state(), Some(ScanState::Running));
    }

    #[test]
    fn test_shutdown_order_and_idempotence() {
        let service = Arc::new(SimulatedScanService::new());
        let mut daq = controller(&service);
        daq.initialize().unwrap();
        daq.start_output_waveform(WaveformShape::Triangle, 1.0, 0.0)
            .unwrap();
        daq.start_input().unwrap();

        daq.shutdown_report().unwrap();
        let calls = service.calls();
        let position = |call: ServiceCall| calls.iter().rposition(|&c| c == call).unwrap();
        assert!(position(ServiceCall::StopScan(Direction::Input)) < position(ServiceCall::Disconnect));
        assert!(position(ServiceCall::StopScan(Direction::Output)) < position(ServiceCall::Disconnect));
        assert!(position(ServiceCall::Disconnect) < position(ServiceCall::Release));
        assert_eq!(service.active_scans(), 0);

        let before = service.calls().len();
        daq.shutdown();
        daq.shutdown();
        assert_eq!(service.calls().len(), before);
        assert!(!daq.is_initialized());

        // Last written input contents stay readable
        assert_eq!(daq.read_input_snapshot().unwrap().len(), 256);
    }

    #[test]
    fn test_drop_releases_device() {
        let service = Arc::new(SimulatedScanService::new());
        {
            let mut daq = controller(&service);
            daq.initialize().unwrap();
            daq.start_input().unwrap();
        }
        assert_eq!(service.open_handles(), 0);
        assert_eq!(service.active_scans(), 0);
    }

    #[test]
    fn test_failing_teardown_still_releases() {
        let service = Arc::new(SimulatedScanService::with_devices(vec![
            SimulatedDevice::default().failing_teardown(),
        ]));
        let mut daq = controller(&service);
        daq.initialize().unwrap();
        daq.start_input().unwrap();
        daq.start_output_waveform(WaveformShape::Sine, 0.5, 0.0)
            .unwrap();

        match daq.shutdown_report() {
            Err(DaqError::ShutdownFailed(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected shutdown result: {:?}", other),
        }
        assert_eq!(service.open_handles(), 0);
        assert_eq!(service.active_scans(), 0);
    }

    #[test]
    fn test_fault_recovery_with_fresh_session() {
        let service = Arc::new(SimulatedScanService::new());
        let mut daq = controller(&service);
        daq.initialize().unwrap();
        daq.start_input().unwrap();

        service.inject_fault(Direction::Input, "overrun");
        assert!(matches!(
            daq.poll_both(),
            Err(DaqError::ScanFault {
                direction: Direction::Input,
                ..
            })
        ));
        assert_eq!(daq.input_state(), Some(ScanState::Faulted));

        daq.start_input().unwrap();
        assert_eq!(daq.poll_both().unwrap(), (true, false));
    }

    #[test]
    fn test_filter_uses_achieved_rate() {
        let service = Arc::new(SimulatedScanService::with_devices(vec![
            SimulatedDevice::default().with_base_clock(64_000.0),
        ]));
        let input = ScanConfig::input()
            .sample_rate(3000.0)
            .samples_per_channel(512)
            .build()
            .unwrap();
        let output = ScanConfig::output().samples_per_channel(64).build().unwrap();
        let mut daq = AcquisitionController::connect(service.clone(), input, output).unwrap();

        assert!(daq.design_input_filter(FilterFamily::LowPass { cutoff: 100.0 }, 4).is_err());

        let actual = daq.start_input().unwrap();
        assert_ne!(actual, 3000.0);
        assert_eq!(daq.actual_input_rate(), Some(actual));

        let family = FilterFamily::LowPass { cutoff: 100.0 };
        let coefficients = daq.design_input_filter(family, 4).unwrap();
        let at_actual = design(&FilterSpec::low_pass(100.0, actual).with_order(4)).unwrap();
        let at_requested = design(&FilterSpec::low_pass(100.0, 3000.0).with_order(4)).unwrap();
        assert_eq!(coefficients, at_actual);
        assert_ne!(coefficients, at_requested);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(daq.filter_input_snapshot(family, 4).unwrap().len(), 512);
    }
}
