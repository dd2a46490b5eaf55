//! Boundary with the hardware scan service.
//!
//! The vendor driver that discovers devices, paces sample transfer and moves
//! data by DMA is an external collaborator. Everything the acquisition core
//! needs from it is captured by the [`ScanService`] trait:
//!
//! - device inventory and connection management
//! - per-direction capability queries (hardware pacer present?)
//! - starting, polling and stopping one hardware-paced scan per direction
//!
//! Every call is non-blocking. Once a scan is started the service moves
//! samples on its own clock, independent of the caller's thread; the caller
//! only polls [`ScanService::scan_status`] and eventually calls
//! [`ScanService::stop_scan`].
//!
//! [`simulated::SimulatedScanService`] implements the trait in-process so the
//! core can run without a physical device.

pub mod simulated;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::scan::buffer::ScanBuffer;
use crate::scan::config::ScanConfig;

/// Scan direction. Each device offers at most one scan per direction at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Analog input (ADC), hardware writes the buffer
    Input,
    /// Analog output (DAC), hardware replays the buffer
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Bus used to discover devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// USB attached devices
    #[default]
    Usb,
    /// Bluetooth devices
    Bluetooth,
    /// Network attached devices
    Ethernet,
    /// Any interface
    Any,
}

impl InterfaceKind {
    /// Whether a device on `other` is visible when enumerating `self`.
    pub fn matches(self, other: InterfaceKind) -> bool {
        self == InterfaceKind::Any || self == other
    }
}

/// Identity of a discoverable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Product name, e.g. "USB-1608GX-2AO"
    pub product_name: String,
    /// Serial number or other unique identifier
    pub unique_id: String,
    /// Interface the device is attached to
    pub interface: InterfaceKind,
}

impl DeviceDescriptor {
    /// Display string used in log messages.
    pub fn dev_string(&self) -> String {
        format!("{} ({})", self.product_name, self.unique_id)
    }
}

/// Opaque handle to a device obtained from [`ScanService::connect`].
///
/// The handle stays valid until [`ScanService::release`] is called, even if
/// the device has been disconnected in the meantime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: u64,
    descriptor: DeviceDescriptor,
}

impl Connection {
    /// Create a handle. Only scan service implementations mint these.
    pub fn new(id: u64, descriptor: DeviceDescriptor) -> Self {
        Self { id, descriptor }
    }

    /// Service-assigned handle id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Device this handle refers to.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

/// What a device offers for one scan direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    /// Whether sample transfer is paced by a hardware clock
    pub has_hardware_pacer: bool,
    /// Number of channels in this direction
    pub num_channels: u32,
    /// Highest per-channel rate the pacer supports (Hz)
    pub max_sample_rate: f64,
}

/// Hardware-reported scan state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// No scan is active (never started, stopped, or a finite scan completed)
    Idle,
    /// The scan is transferring samples
    Running,
    /// The hardware stopped the scan because of an error (overrun, underrun, ...)
    Error(String),
}

/// Transfer progress of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatus {
    /// Number of complete scans transferred since start
    pub current_scan_count: u64,
    /// Total samples transferred since start
    pub current_total_count: u64,
    /// Buffer index of the most recently transferred sample
    pub current_index: usize,
}

/// Result of [`ScanService::scan_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Scan state
    pub status: ScanStatus,
    /// Transfer progress
    pub transfer: TransferStatus,
}

impl StatusReport {
    /// Report for a direction with no active scan.
    pub fn idle() -> Self {
        Self {
            status: ScanStatus::Idle,
            transfer: TransferStatus::default(),
        }
    }
}

/// Hardware scan service operations required by the acquisition core.
///
/// Implementations must be safe to share between threads; the core only ever
/// calls them from the thread that owns the controller, but the service runs
/// its own pacing machinery concurrently.
pub trait ScanService: Send + Sync {
    /// List the devices visible on `interface`.
    fn enumerate_devices(&self, interface: InterfaceKind) -> AppResult<Vec<DeviceDescriptor>>;

    /// Open a handle to `device` and connect to it.
    fn connect(&self, device: &DeviceDescriptor) -> AppResult<Connection>;

    /// Post-connect check.
    fn is_connected(&self, connection: &Connection) -> bool;

    /// Disconnect without releasing the handle.
    fn disconnect(&self, connection: &Connection) -> AppResult<()>;

    /// Query what the device offers in `direction`.
    fn capabilities(&self, connection: &Connection, direction: Direction)
        -> AppResult<Capabilities>;

    /// Submit a scan and return the rate the pacer actually achieved.
    ///
    /// For input the service writes `buffer`; for output it replays `buffer`.
    /// In continuous mode both wrap around the buffer until stopped.
    fn start_scan(
        &self,
        connection: &Connection,
        direction: Direction,
        config: &ScanConfig,
        buffer: &ScanBuffer,
    ) -> AppResult<f64>;

    /// Non-blocking status query.
    fn scan_status(&self, connection: &Connection, direction: Direction)
        -> AppResult<StatusReport>;

    /// Stop the scan in `direction`. Stopping an idle direction is a no-op.
    fn stop_scan(&self, connection: &Connection, direction: Direction) -> AppResult<()>;

    /// Release the handle and every hardware-side allocation tied to it.
    fn release(&self, connection: &Connection) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_matching() {
        assert!(InterfaceKind::Any.matches(InterfaceKind::Usb));
        assert!(InterfaceKind::Usb.matches(InterfaceKind::Usb));
        assert!(!InterfaceKind::Usb.matches(InterfaceKind::Ethernet));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Input.to_string(), "input");
        assert_eq!(Direction::Output.to_string(), "output");
    }
}
