//! # Scan DAQ Core Library
//!
//! Continuous, hardware-paced analog input and output scanning with
//! zero-phase digital filtering of the acquired data.
//!
//! ## Crate Structure
//!
//! - **`controller`**: `AcquisitionController`, which brings up a single
//!   device, owns one input and one output scan and guarantees teardown on
//!   every exit path.
//! - **`scan`**: `ScanConfig` builders, the shared `ScanBuffer` and the
//!   `ScanSession` state machine (Idle, Armed, Running, Stopped, Faulted).
//! - **`hardware`**: the `ScanService` boundary with the vendor driver and an
//!   in-process simulated implementation.
//! - **`waveform`**: sine and triangle output waveforms over one cycle.
//! - **`filter`**: Butterworth design and forward-backward application.
//! - **`processor`**: staged post-processing pipelines over snapshots.
//! - **`config`**: figment-based configuration (TOML file + environment).
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the `DaqError` enum shared by every module.

pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod hardware;
pub mod logging;
pub mod processor;
pub mod scan;
pub mod waveform;

pub use controller::AcquisitionController;
pub use error::{AppResult, DaqError};
