//! Configuration loading using Figment.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`DaqConfig::default`])
//! 2. `config/scan_daq.toml` (or the path given to [`DaqConfig::load_from`])
//! 3. Environment variables prefixed with `SCAN_DAQ_`, nested keys separated
//!    by `__`, e.g. `SCAN_DAQ_INPUT__SAMPLE_RATE=2000`
//!
//! The `[input]` and `[output]` sections are converted into [`ScanConfig`]s
//! through the validated builders, so scan defaults live in one place.
//!
//! # Example
//! ```no_run
//! use scan_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Input rate: {} Hz", config.input.sample_rate);
//! # Ok::<(), scan_daq::DaqError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};
use crate::filter::{FilterFamily, FilterSpec, DEFAULT_ORDER};
use crate::hardware::{Direction, InterfaceKind};
use crate::logging::parse_log_level;
use crate::scan::config::{
    InputMode, ScanConfig, ScanFlags, ScanMode, VoltageRange, DEFAULT_CHANNEL,
    DEFAULT_SAMPLES_PER_CHANNEL, DEFAULT_SAMPLE_RATE,
};
use crate::waveform::WaveformShape;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/scan_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SCAN_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Analog input scan
    pub input: ScanSection,
    /// Analog output scan
    pub output: ScanSection,
    /// Output waveform
    pub waveform: WaveformConfig,
    /// Optional filter applied to input snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    /// Device selection and polling
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// One scan direction as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSection {
    /// Channel index
    pub channel: u32,
    /// Input wiring mode; only meaningful for `[input]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mode: Option<InputMode>,
    /// Voltage range
    pub range: VoltageRange,
    /// Requested sample rate (Hz)
    pub sample_rate: f64,
    /// Buffer capacity
    pub samples_per_channel: usize,
    /// Finite or continuous
    pub mode: ScanMode,
    /// Driver flags
    pub flags: ScanFlags,
}

impl ScanSection {
    fn defaults(direction: Direction) -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            input_mode: match direction {
                Direction::Input => Some(InputMode::SingleEnded),
                Direction::Output => None,
            },
            range: VoltageRange::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            samples_per_channel: DEFAULT_SAMPLES_PER_CHANNEL,
            mode: ScanMode::Continuous,
            flags: ScanFlags::DEFAULT,
        }
    }

    /// Build a validated [`ScanConfig`] for `direction`.
    pub fn to_scan_config(&self, direction: Direction) -> AppResult<ScanConfig> {
        let mut builder = ScanConfig::builder(direction)
            .channel(self.channel)
            .range(self.range)
            .sample_rate(self.sample_rate)
            .samples_per_channel(self.samples_per_channel)
            .mode(self.mode)
            .flags(self.flags);
        if let Some(mode) = self.input_mode {
            builder = builder.input_mode(mode);
        }
        builder.build()
    }
}

/// Output waveform settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformConfig {
    /// Shape
    pub shape: WaveformShape,
    /// Peak amplitude (V)
    pub amplitude: f64,
    /// DC offset (V)
    pub offset: f64,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            shape: WaveformShape::Triangle,
            amplitude: 1.0,
            offset: 0.0,
        }
    }
}

/// Filter applied to input snapshots. The sampling rate is not configured:
/// it is the rate the input pacer actually achieved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Response family and cutoffs
    #[serde(flatten)]
    pub family: FilterFamily,
    /// Butterworth order
    #[serde(default = "default_order")]
    pub order: usize,
}

fn default_order() -> usize {
    DEFAULT_ORDER
}

impl FilterConfig {
    /// Filter specification for data sampled at `sampling_rate`.
    pub fn spec(&self, sampling_rate: f64) -> FilterSpec {
        FilterSpec {
            family: self.family,
            sampling_rate,
            order: self.order,
        }
    }
}

/// Device selection and polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Interface used to discover the device
    pub interface: InterfaceKind,
    /// Delay between status polls (ms)
    pub poll_interval_ms: u64,
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "scan_daq".to_string(),
                log_level: "info".to_string(),
            },
            input: ScanSection::defaults(Direction::Input),
            output: ScanSection::defaults(Direction::Output),
            waveform: WaveformConfig::default(),
            filter: None,
            acquisition: AcquisitionConfig {
                interface: InterfaceKind::Usb,
                poll_interval_ms: 1000,
            },
        }
    }
}

impl DaqConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file is not
    /// an error; the defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        parse_log_level(&self.application.log_level)?;

        let input = self.input_scan_config()?;
        self.output_scan_config()?;

        if !self.waveform.amplitude.is_finite() || !self.waveform.offset.is_finite() {
            return Err(DaqError::Configuration(format!(
                "Waveform amplitude and offset must be finite, got {} and {}",
                self.waveform.amplitude, self.waveform.offset
            )));
        }

        if let Some(filter) = &self.filter {
            filter.spec(input.sample_rate()).validate()?;
        }

        if self.acquisition.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "acquisition.poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Validated analog input scan configuration.
    pub fn input_scan_config(&self) -> AppResult<ScanConfig> {
        self.input.to_scan_config(Direction::Input)
    }

    /// Validated analog output scan configuration.
    pub fn output_scan_config(&self) -> AppResult<ScanConfig> {
        self.output.to_scan_config(Direction::Output)
    }

    /// Delay between status polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquisition.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_scan_defaults() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok());

        let input = config.input_scan_config().unwrap();
        assert_eq!(input, ScanConfig::input().build().unwrap());
        let output = config.output_scan_config().unwrap();
        assert_eq!(output, ScanConfig::output().build().unwrap());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let config = DaqConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, DaqConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"

            [input]
            sample_rate = 2000.0
            samples_per_channel = 500
            input_mode = "differential"

            [waveform]
            shape = "sine"
            amplitude = 2.5

            [filter]
            type = "low_pass"
            cutoff = 100.0
            order = 4
            "#,
        );

        let config = DaqConfig::load_from(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "scan_daq");

        let input = config.input_scan_config().unwrap();
        assert_eq!(input.sample_rate(), 2000.0);
        assert_eq!(input.samples_per_channel(), 500);
        assert_eq!(input.input_mode(), Some(InputMode::Differential));
        // Untouched keys keep their defaults
        assert_eq!(input.mode(), ScanMode::Continuous);

        assert_eq!(config.waveform.shape, WaveformShape::Sine);
        assert_eq!(config.waveform.offset, 0.0);

        let filter = config.filter.unwrap();
        assert_eq!(filter.family, FilterFamily::LowPass { cutoff: 100.0 });
        assert_eq!(filter.spec(1000.0).order, 4);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config(
            r#"
            [output]
            sample_rate = 500.0
            "#,
        );

        std::env::set_var("SCAN_DAQ_OUTPUT__SAMPLE_RATE", "750.0");
        std::env::set_var("SCAN_DAQ_ACQUISITION__POLL_INTERVAL_MS", "50");
        let config = DaqConfig::load_from(file.path());
        std::env::remove_var("SCAN_DAQ_OUTPUT__SAMPLE_RATE");
        std::env::remove_var("SCAN_DAQ_ACQUISITION__POLL_INTERVAL_MS");

        let config = config.unwrap();
        assert_eq!(config.output.sample_rate, 750.0);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = DaqConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = DaqConfig::default();
        config.output.input_mode = Some(InputMode::SingleEnded);
        assert!(matches!(
            config.validate(),
            Err(DaqError::InvalidScanConfig(_))
        ));

        let mut config = DaqConfig::default();
        config.input.samples_per_channel = 0;
        assert!(config.validate().is_err());

        let mut config = DaqConfig::default();
        config.filter = Some(FilterConfig {
            family: FilterFamily::HighPass { cutoff: 900.0 },
            order: 5,
        });
        assert!(matches!(
            config.validate(),
            Err(DaqError::InvalidFilterParameters(_))
        ));

        let mut config = DaqConfig::default();
        config.acquisition.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let file = write_config("[input]\nsample_rate = \"fast\"\n");
        assert!(matches!(
            DaqConfig::load_from(file.path()),
            Err(DaqError::Config(_))
        ));
    }
}
