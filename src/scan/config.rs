//! Scan configuration for one direction.
//!
//! [`ScanConfig`] is the single source of scan defaults. The builders returned
//! by [`ScanConfig::input`] and [`ScanConfig::output`] start from the
//! defaults of each direction and validate on [`ScanConfigBuilder::build`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};
use crate::hardware::Direction;

/// Default channel for both directions.
pub const DEFAULT_CHANNEL: u32 = 1;
/// Default requested per-channel rate in Hz.
pub const DEFAULT_SAMPLE_RATE: f64 = 1000.0;
/// Default buffer capacity in samples per channel.
pub const DEFAULT_SAMPLES_PER_CHANNEL: usize = 10_000;

/// Analog input wiring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Referenced to ground
    #[default]
    SingleEnded,
    /// Difference between two inputs
    Differential,
}

/// Voltage range of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageRange {
    /// -10V to +10V
    #[default]
    Bip10Volts,
    /// -5V to +5V
    Bip5Volts,
    /// 0V to +10V
    Uni10Volts,
    /// 0V to +5V
    Uni5Volts,
}

impl VoltageRange {
    /// Get the minimum voltage for this range.
    pub fn min(&self) -> f64 {
        match self {
            Self::Bip10Volts => -10.0,
            Self::Bip5Volts => -5.0,
            Self::Uni10Volts | Self::Uni5Volts => 0.0,
        }
    }

    /// Get the maximum voltage for this range.
    pub fn max(&self) -> f64 {
        match self {
            Self::Bip10Volts | Self::Uni10Volts => 10.0,
            Self::Bip5Volts | Self::Uni5Volts => 5.0,
        }
    }

    /// Check if a voltage is within this range.
    pub fn contains(&self, voltage: f64) -> bool {
        voltage >= self.min() && voltage <= self.max()
    }

    /// Get a human-readable description of this range.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Bip10Volts => "±10V",
            Self::Bip5Volts => "±5V",
            Self::Uni10Volts => "0-10V",
            Self::Uni5Volts => "0-5V",
        }
    }
}

/// Whether the scan stops after one buffer or wraps indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Transfer `samples_per_channel` samples, then stop
    Finite,
    /// Wrap around the buffer until stopped
    #[default]
    Continuous,
}

bitflags! {
    /// Driver flags passed through to the scan service.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ScanFlags: u32 {
        /// Return raw counts instead of scaled engineering units
        const NO_SCALE_DATA = 1 << 0;
        /// Skip the device calibration factors
        const NO_CALIBRATE_DATA = 1 << 1;
    }
}

impl ScanFlags {
    /// Driver defaults (no flags set).
    pub const DEFAULT: Self = Self::empty();
}

impl Default for ScanFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Immutable configuration of a single-channel scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    direction: Direction,
    channel: u32,
    input_mode: Option<InputMode>,
    range: VoltageRange,
    sample_rate: f64,
    samples_per_channel: usize,
    mode: ScanMode,
    flags: ScanFlags,
}

impl ScanConfig {
    /// Builder seeded with the analog input defaults.
    pub fn input() -> ScanConfigBuilder {
        ScanConfigBuilder::new(Direction::Input)
    }

    /// Builder seeded with the analog output defaults.
    pub fn output() -> ScanConfigBuilder {
        ScanConfigBuilder::new(Direction::Output)
    }

    /// Builder seeded with the defaults of `direction`.
    pub fn builder(direction: Direction) -> ScanConfigBuilder {
        ScanConfigBuilder::new(direction)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AppResult<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(DaqError::InvalidScanConfig(format!(
                "Invalid sample rate: {}",
                self.sample_rate
            )));
        }

        if self.samples_per_channel == 0 {
            return Err(DaqError::InvalidScanConfig(
                "samples_per_channel must be greater than 0".to_string(),
            ));
        }

        match (self.direction, self.input_mode) {
            (Direction::Input, None) => Err(DaqError::InvalidScanConfig(
                "Analog input scans require an input mode".to_string(),
            )),
            (Direction::Output, Some(_)) => Err(DaqError::InvalidScanConfig(
                "Input mode does not apply to analog output scans".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Direction this configuration applies to.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Channel index (single-channel scans: low channel == high channel).
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Input wiring mode; `None` for output scans.
    pub fn input_mode(&self) -> Option<InputMode> {
        self.input_mode
    }

    /// Voltage range.
    pub fn range(&self) -> VoltageRange {
        self.range
    }

    /// Requested per-channel rate in Hz. The achieved rate is reported by the
    /// session after start and may differ.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Buffer capacity in samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    /// Finite or continuous.
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Driver flags.
    pub fn flags(&self) -> ScanFlags {
        self.flags
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug, Clone)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    fn new(direction: Direction) -> Self {
        let input_mode = match direction {
            Direction::Input => Some(InputMode::default()),
            Direction::Output => None,
        };

        Self {
            config: ScanConfig {
                direction,
                channel: DEFAULT_CHANNEL,
                input_mode,
                range: VoltageRange::default(),
                sample_rate: DEFAULT_SAMPLE_RATE,
                samples_per_channel: DEFAULT_SAMPLES_PER_CHANNEL,
                mode: ScanMode::default(),
                flags: ScanFlags::DEFAULT,
            },
        }
    }

    /// Set the channel index.
    pub fn channel(mut self, channel: u32) -> Self {
        self.config.channel = channel;
        self
    }

    /// Set the input wiring mode (input scans only).
    pub fn input_mode(mut self, mode: InputMode) -> Self {
        self.config.input_mode = Some(mode);
        self
    }

    /// Set the voltage range.
    pub fn range(mut self, range: VoltageRange) -> Self {
        self.config.range = range;
        self
    }

    /// Set the requested sample rate in Hz.
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.config.sample_rate = rate;
        self
    }

    /// Set the buffer capacity in samples per channel.
    pub fn samples_per_channel(mut self, samples: usize) -> Self {
        self.config.samples_per_channel = samples;
        self
    }

    /// Set finite or continuous scanning.
    pub fn mode(mut self, mode: ScanMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set driver flags.
    pub fn flags(mut self, flags: ScanFlags) -> Self {
        self.config.flags = flags;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> AppResult<ScanConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    #[cfg(test)]
    pub(crate) fn unchecked(self) -> ScanConfig {
        self.config
    }
}
