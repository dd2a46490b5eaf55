//! Continuous hardware-paced scans.
//!
//! - [`config`] - [`ScanConfig`] and its validated builders
//! - [`buffer`] - [`ScanBuffer`], the buffer shared with the scan service
//! - [`session`] - [`ScanSession`], the per-direction scan state machine

pub mod buffer;
pub mod config;
pub mod session;

pub use buffer::ScanBuffer;
pub use config::{InputMode, ScanConfig, ScanConfigBuilder, ScanFlags, ScanMode, VoltageRange};
pub use session::{ScanSession, ScanState};
