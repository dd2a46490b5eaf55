//! Scan session state machine.
//!
//! A [`ScanSession`] wraps one hardware-paced scan in one direction:
//!
//! ```text
//!   Idle --arm--> Armed --start--> Running --stop--> Stopped
//!                   |                 |
//!                   +------stop-------+---> Stopped
//!                                     |
//!                                    poll (hardware error)
//!                                     v
//!                                  Faulted
//! ```
//!
//! Every transition is a single non-blocking call into the scan service.
//! `Faulted` is terminal: recover by arming a new session.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{AppResult, DaqError};
use crate::hardware::{Connection, Direction, ScanService, ScanStatus, StatusReport};
use crate::scan::buffer::ScanBuffer;
use crate::scan::config::{ScanConfig, ScanMode};

/// Lifecycle state of a [`ScanSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Created, no configuration yet
    Idle,
    /// Configuration validated and buffer allocated
    Armed,
    /// Accepted by the scan service and transferring
    Running,
    /// Stopped by the caller or a finite scan completed
    Stopped,
    /// Hardware reported an error; terminal
    Faulted,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// One continuous or finite scan in one direction.
pub struct ScanSession {
    direction: Direction,
    service: Arc<dyn ScanService>,
    connection: Connection,
    state: ScanState,
    config: Option<ScanConfig>,
    buffer: Option<ScanBuffer>,
    actual_rate: Option<f64>,
    last_status: Option<StatusReport>,
    fault: Option<String>,
}

impl ScanSession {
    /// Create an idle session bound to `connection`.
    pub fn new(direction: Direction, service: Arc<dyn ScanService>, connection: Connection) -> Self {
        Self {
            direction,
            service,
            connection,
            state: ScanState::Idle,
            config: None,
            buffer: None,
            actual_rate: None,
            last_status: None,
            fault: None,
        }
    }

    /// Validate `config` against the device and allocate the buffer.
    ///
    /// Only valid from `Idle`. A rejected configuration leaves the session
    /// `Idle`.
    pub fn arm(&mut self, config: ScanConfig) -> AppResult<()> {
        self.require(ScanState::Idle, "arm a scan")?;

        config.validate()?;
        if config.direction() != self.direction {
            return Err(DaqError::InvalidScanConfig(format!(
                "Configuration is for analog {} but the session drives analog {}",
                config.direction(),
                self.direction
            )));
        }

        let caps = self.service.capabilities(&self.connection, self.direction)?;
        if !caps.has_hardware_pacer {
            return Err(DaqError::UnsupportedCapability {
                direction: self.direction,
            });
        }
        if config.channel() >= caps.num_channels {
            return Err(DaqError::InvalidScanConfig(format!(
                "Invalid channel {}: device has {} analog {} channels",
                config.channel(),
                caps.num_channels,
                self.direction
            )));
        }
        if config.sample_rate() > caps.max_sample_rate {
            return Err(DaqError::InvalidScanConfig(format!(
                "Sample rate {} Hz exceeds maximum {} Hz",
                config.sample_rate(),
                caps.max_sample_rate
            )));
        }

        debug!(
            direction = %self.direction,
            channel = config.channel(),
            rate = config.sample_rate(),
            capacity = config.samples_per_channel(),
            mode = ?config.mode(),
            "Armed scan"
        );

        self.buffer = Some(ScanBuffer::new(config.samples_per_channel()));
        self.config = Some(config);
        self.state = ScanState::Armed;
        Ok(())
    }

    /// Copy `samples` into the output buffer.
    ///
    /// Only valid for an output session in `Armed`; the buffer must never be
    /// mutated while the hardware replays it.
    pub fn load_output(&mut self, samples: &[f64]) -> AppResult<()> {
        if self.direction != Direction::Output {
            return Err(DaqError::InvalidState {
                operation: "load an output waveform",
                state: "driving analog input".to_string(),
            });
        }
        self.require(ScanState::Armed, "load an output waveform")?;

        match &self.buffer {
            Some(buffer) => buffer.fill(samples),
            None => Err(DaqError::InvalidState {
                operation: "load an output waveform",
                state: "no buffer is allocated".to_string(),
            }),
        }
    }

    /// Submit the scan to the hardware scan service.
    ///
    /// Returns the achieved sample rate, which may differ from the requested
    /// one. Only valid from `Armed`; anything else is rejected without
    /// touching the hardware.
    pub fn start(&mut self) -> AppResult<f64> {
        self.require(ScanState::Armed, "start a scan")?;

        let (config, buffer) = match (&self.config, &self.buffer) {
            (Some(config), Some(buffer)) => (config, buffer),
            _ => {
                return Err(DaqError::InvalidState {
                    operation: "start a scan",
                    state: "armed without a configuration".to_string(),
                })
            }
        };

        let actual_rate =
            self.service
                .start_scan(&self.connection, self.direction, config, buffer)?;

        if (actual_rate - config.sample_rate()).abs() > f64::EPSILON * config.sample_rate() {
            info!(
                direction = %self.direction,
                requested = config.sample_rate(),
                actual = actual_rate,
                "Pacer rate differs from requested rate"
            );
        }

        info!(
            direction = %self.direction,
            rate = actual_rate,
            capacity = config.samples_per_channel(),
            "Started scan"
        );

        self.actual_rate = Some(actual_rate);
        self.state = ScanState::Running;
        Ok(actual_rate)
    }

    /// Non-blocking status check.
    ///
    /// A running session moves to `Faulted` (and this returns
    /// [`DaqError::ScanFault`]) when the hardware reports an error, and to
    /// `Stopped` when a finite scan has completed. Sessions that are not
    /// running return their state without querying the hardware.
    pub fn poll(&mut self) -> AppResult<ScanState> {
        if self.state != ScanState::Running {
            return Ok(self.state);
        }

        let report = self.service.scan_status(&self.connection, self.direction)?;
        let status = report.status.clone();
        self.last_status = Some(report);

        match status {
            ScanStatus::Running => {}
            ScanStatus::Idle => {
                if self.mode() == Some(ScanMode::Continuous) {
                    warn!(direction = %self.direction, "Continuous scan went idle");
                }
                debug!(direction = %self.direction, "Scan completed");
                self.state = ScanState::Stopped;
            }
            ScanStatus::Error(message) => {
                warn!(direction = %self.direction, error = %message, "Scan faulted");
                self.state = ScanState::Faulted;
                self.fault = Some(message.clone());
                return Err(DaqError::ScanFault {
                    direction: self.direction,
                    message,
                });
            }
        }

        Ok(self.state)
    }

    /// Stop the scan. Valid from `Running` and `Armed`; stopping an already
    /// stopped session is a no-op.
    pub fn stop(&mut self) -> AppResult<()> {
        match self.state {
            ScanState::Running => {
                self.service.stop_scan(&self.connection, self.direction)?;
                info!(direction = %self.direction, "Stopped scan");
            }
            ScanState::Armed => {
                debug!(direction = %self.direction, "Stopped armed scan before start");
            }
            ScanState::Stopped => return Ok(()),
            ScanState::Idle | ScanState::Faulted => {
                return Err(DaqError::InvalidState {
                    operation: "stop a scan",
                    state: self.state.to_string(),
                })
            }
        }
        self.state = ScanState::Stopped;
        Ok(())
    }

    /// Release the hardware side of the scan on teardown.
    ///
    /// Unlike [`stop`](Self::stop) this also tells the service to stop a
    /// faulted scan, since the driver may still hold resources for it. The
    /// session state is left as `Faulted` in that case.
    pub(crate) fn halt(&mut self) -> AppResult<()> {
        match self.state {
            ScanState::Running | ScanState::Armed => self.stop(),
            ScanState::Faulted => self.service.stop_scan(&self.connection, self.direction),
            ScanState::Idle | ScanState::Stopped => Ok(()),
        }
    }

    /// Copy of the input buffer.
    ///
    /// After the session stops or faults this returns the last written
    /// contents. Output buffers cannot be read back.
    pub fn snapshot(&self) -> AppResult<Vec<f64>> {
        if self.direction != Direction::Input {
            return Err(DaqError::InvalidState {
                operation: "read back an output buffer",
                state: self.state.to_string(),
            });
        }

        self.buffer
            .as_ref()
            .map(ScanBuffer::snapshot)
            .ok_or_else(|| DaqError::InvalidState {
                operation: "read the input buffer",
                state: self.state.to_string(),
            })
    }

    /// Mean of the input buffer, if one exists.
    pub fn mean(&self) -> Option<f64> {
        match self.direction {
            Direction::Input => self.buffer.as_ref().and_then(ScanBuffer::mean),
            Direction::Output => None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Whether the last observed state is `Running`.
    pub fn is_running(&self) -> bool {
        self.state == ScanState::Running
    }

    /// Scan direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Armed configuration.
    pub fn config(&self) -> Option<&ScanConfig> {
        self.config.as_ref()
    }

    /// Rate achieved by the pacer; `None` until started.
    pub fn actual_rate(&self) -> Option<f64> {
        self.actual_rate
    }

    /// Last status report observed by [`poll`](Self::poll).
    pub fn last_status(&self) -> Option<&StatusReport> {
        self.last_status.as_ref()
    }

    /// Hardware error message that faulted the session.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    fn mode(&self) -> Option<ScanMode> {
        self.config.as_ref().map(ScanConfig::mode)
    }

    fn require(&self, expected: ScanState, operation: &'static str) -> AppResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DaqError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }
}

impl fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("actual_rate", &self.actual_rate)
            .field("connection", &self.connection.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::{ServiceCall, SimulatedDevice, SimulatedScanService};
    use crate::hardware::{InterfaceKind, ScanService};

    fn connected(service: &Arc<SimulatedScanService>) -> Connection {
        let devices = service.enumerate_devices(InterfaceKind::Usb).unwrap();
        service.connect(&devices[0]).unwrap()
    }

    fn small_input() -> ScanConfig {
        ScanConfig::input().samples_per_channel(64).build().unwrap()
    }

    #[test]
    fn test_lifecycle_input() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service.clone(), conn);

        assert_eq!(session.state(), ScanState::Idle);
        session.arm(small_input()).unwrap();
        assert_eq!(session.state(), ScanState::Armed);

        let rate = session.start().unwrap();
        assert_eq!(session.state(), ScanState::Running);
        assert_eq!(session.actual_rate(), Some(rate));
        assert_eq!(session.poll().unwrap(), ScanState::Running);
        assert_eq!(session.snapshot().unwrap().len(), 64);

        session.stop().unwrap();
        assert_eq!(session.state(), ScanState::Stopped);
        // Last written contents stay readable
        assert_eq!(session.snapshot().unwrap().len(), 64);
    }

    #[test]
    fn test_arm_rejects_zero_capacity_without_state_change() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service, conn);

        let zero_capacity = ScanConfig::input().samples_per_channel(0).unchecked();
        assert!(matches!(
            session.arm(zero_capacity),
            Err(DaqError::InvalidScanConfig(_))
        ));
        assert_eq!(session.state(), ScanState::Idle);

        let wrong_direction = ScanConfig::output().build().unwrap();
        assert!(matches!(
            session.arm(wrong_direction),
            Err(DaqError::InvalidScanConfig(_))
        ));
        assert_eq!(session.state(), ScanState::Idle);
    }

    #[test]
    fn test_arm_rejects_out_of_range_channel() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service, conn);

        let config = ScanConfig::input().channel(99).build().unwrap();
        assert!(matches!(
            session.arm(config),
            Err(DaqError::InvalidScanConfig(_))
        ));
    }

    #[test]
    fn test_start_twice_is_rejected_without_side_effects() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service.clone(), conn);
        session.arm(small_input()).unwrap();
        session.start().unwrap();

        let starts_before = service
            .calls()
            .iter()
            .filter(|c| matches!(c, ServiceCall::StartScan(_)))
            .count();

        let err = session.start().unwrap_err();
        assert!(matches!(err, DaqError::InvalidState { .. }));
        assert_eq!(session.state(), ScanState::Running);

        let starts_after = service
            .calls()
            .iter()
            .filter(|c| matches!(c, ServiceCall::StartScan(_)))
            .count();
        assert_eq!(starts_before, starts_after);

        session.stop().unwrap();
    }

    #[test]
    fn test_start_requires_armed() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Output, service, conn);
        assert!(matches!(
            session.start(),
            Err(DaqError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_stop_from_armed() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service.clone(), conn);
        session.arm(small_input()).unwrap();
        session.stop().unwrap();
        assert_eq!(session.state(), ScanState::Stopped);
        assert!(!service
            .calls()
            .iter()
            .any(|c| matches!(c, ServiceCall::StopScan(_))));

        // Idempotent
        session.stop().unwrap();
    }

    #[test]
    fn test_stop_from_idle_is_rejected() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service, conn);
        assert!(matches!(session.stop(), Err(DaqError::InvalidState { .. })));
    }

    #[test]
    fn test_output_buffer_locked_while_running() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Output, service, conn);
        session
            .arm(ScanConfig::output().samples_per_channel(4).build().unwrap())
            .unwrap();
        session.load_output(&[0.0, 1.0, 0.0, -1.0]).unwrap();
        session.start().unwrap();

        let err = session.load_output(&[1.0; 4]).unwrap_err();
        assert!(matches!(err, DaqError::InvalidState { .. }));

        // Output buffers are not readable through the session
        assert!(session.snapshot().is_err());
        session.stop().unwrap();
    }

    #[test]
    fn test_fault_is_terminal() {
        let service = Arc::new(SimulatedScanService::new());
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service.clone(), conn);
        session.arm(small_input()).unwrap();
        session.start().unwrap();

        service.inject_fault(Direction::Input, "buffer overrun");
        let err = session.poll().unwrap_err();
        assert!(matches!(err, DaqError::ScanFault { .. }));
        assert_eq!(session.state(), ScanState::Faulted);
        assert_eq!(session.fault(), Some("buffer overrun"));

        // Terminal: no restart, no stop
        assert!(session.start().is_err());
        assert!(session.stop().is_err());
        assert_eq!(session.poll().unwrap(), ScanState::Faulted);
        assert!(session.arm(small_input()).is_err());

        // Teardown still releases the hardware side
        session.halt().unwrap();
        assert_eq!(session.state(), ScanState::Faulted);
    }

    #[test]
    fn test_finite_scan_completes() {
        let service = Arc::new(SimulatedScanService::with_devices(vec![
            SimulatedDevice::new("USB-1608GX-2AO", "01A2B3C4")
        ]));
        let conn = connected(&service);
        let mut session = ScanSession::new(Direction::Input, service, conn);
        session
            .arm(
                ScanConfig::input()
                    .samples_per_channel(20)
                    .sample_rate(10_000.0)
                    .mode(ScanMode::Finite)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        session.start().unwrap();

        let mut state = ScanState::Running;
        for _ in 0..200 {
            state = session.poll().unwrap();
            if state != ScanState::Running {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(state, ScanState::Stopped);
        let transfer = session.last_status().unwrap().transfer;
        assert_eq!(transfer.current_total_count, 20);
    }
}
