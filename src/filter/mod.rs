//! Butterworth filter design and zero-phase application.
//!
//! - [`design`] turns a [`FilterSpec`] into [`FilterCoefficients`]
//! - [`apply`] runs coefficients forward and backward over a bounded buffer
//!
//! Filters are applied to snapshots, never to a live scan buffer: zero-phase
//! filtering needs the whole sequence in memory.

pub mod apply;
pub mod design;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

pub use apply::{apply, bandpass_filter, highpass_filter, lfilter, lowpass_filter};
pub use design::design;

/// Default Butterworth order.
pub const DEFAULT_ORDER: usize = 5;

/// Filter response family with its cutoff frequencies in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterFamily {
    /// Pass frequencies below `cutoff`
    LowPass {
        /// Cutoff frequency (Hz)
        cutoff: f64,
    },
    /// Pass frequencies above `cutoff`
    HighPass {
        /// Cutoff frequency (Hz)
        cutoff: f64,
    },
    /// Pass frequencies between `low` and `high`
    BandPass {
        /// Lower band edge (Hz)
        low: f64,
        /// Upper band edge (Hz)
        high: f64,
    },
}

impl FilterFamily {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LowPass { .. } => "low-pass",
            Self::HighPass { .. } => "high-pass",
            Self::BandPass { .. } => "band-pass",
        }
    }
}

/// Everything needed to design one digital filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Response family and cutoffs
    #[serde(flatten)]
    pub family: FilterFamily,
    /// Sampling rate of the data to be filtered (Hz)
    pub sampling_rate: f64,
    /// Butterworth order
    #[serde(default = "default_order")]
    pub order: usize,
}

fn default_order() -> usize {
    DEFAULT_ORDER
}

impl FilterSpec {
    /// Low-pass filter of the default order.
    pub fn low_pass(cutoff: f64, sampling_rate: f64) -> Self {
        Self::new(FilterFamily::LowPass { cutoff }, sampling_rate)
    }

    /// High-pass filter of the default order.
    pub fn high_pass(cutoff: f64, sampling_rate: f64) -> Self {
        Self::new(FilterFamily::HighPass { cutoff }, sampling_rate)
    }

    /// Band-pass filter of the default order.
    pub fn band_pass(low: f64, high: f64, sampling_rate: f64) -> Self {
        Self::new(FilterFamily::BandPass { low, high }, sampling_rate)
    }

    fn new(family: FilterFamily, sampling_rate: f64) -> Self {
        Self {
            family,
            sampling_rate,
            order: DEFAULT_ORDER,
        }
    }

    /// Override the order.
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Same filter for data sampled at `sampling_rate`.
    pub fn at_rate(mut self, sampling_rate: f64) -> Self {
        self.sampling_rate = sampling_rate;
        self
    }

    /// Nyquist frequency of the sampling rate.
    pub fn nyquist(&self) -> f64 {
        self.sampling_rate / 2.0
    }

    /// Check the preconditions of [`design`].
    pub fn validate(&self) -> AppResult<()> {
        if self.order == 0 {
            return Err(DaqError::InvalidFilterParameters(
                "Order must be at least 1".to_string(),
            ));
        }
        if !self.sampling_rate.is_finite() || self.sampling_rate <= 0.0 {
            return Err(DaqError::InvalidFilterParameters(format!(
                "Sampling rate must be positive, got {}",
                self.sampling_rate
            )));
        }

        let nyquist = self.nyquist();
        let in_band = |f: f64| f.is_finite() && f > 0.0 && f < nyquist;
        match self.family {
            FilterFamily::LowPass { cutoff } | FilterFamily::HighPass { cutoff } => {
                if !in_band(cutoff) {
                    return Err(DaqError::InvalidFilterParameters(format!(
                        "Cutoff {} Hz must lie in (0, {}) Hz",
                        cutoff, nyquist
                    )));
                }
            }
            FilterFamily::BandPass { low, high } => {
                if !in_band(low) || !in_band(high) || low >= high {
                    return Err(DaqError::InvalidFilterParameters(format!(
                        "Band edges {}..{} Hz must satisfy 0 < low < high < {} Hz",
                        low, high, nyquist
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Feed-forward (`b`) and feedback (`a`) coefficients of a digital filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCoefficients {
    /// Numerator, highest power of `z⁻¹` last
    pub b: Vec<f64>,
    /// Denominator, `a[0]` is the leading coefficient
    pub a: Vec<f64>,
}

impl FilterCoefficients {
    /// Number of taps of the longer polynomial.
    pub fn taps(&self) -> usize {
        self.b.len().max(self.a.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_validation() {
        assert!(FilterSpec::low_pass(100.0, 1000.0).validate().is_ok());
        assert!(FilterSpec::low_pass(500.0, 1000.0).validate().is_err());
        assert!(FilterSpec::high_pass(0.0, 1000.0).validate().is_err());
        assert!(FilterSpec::band_pass(200.0, 100.0, 1000.0).validate().is_err());
        assert!(FilterSpec::low_pass(100.0, 1000.0)
            .with_order(0)
            .validate()
            .is_err());
        assert!(FilterSpec::low_pass(100.0, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_spec_from_toml() {
        let spec: FilterSpec = toml::from_str(
            r#"
            type = "band_pass"
            low = 5.0
            high = 50.0
            sampling_rate = 1000.0
            "#,
        )
        .unwrap();
        assert_eq!(spec.family, FilterFamily::BandPass { low: 5.0, high: 50.0 });
        assert_eq!(spec.order, DEFAULT_ORDER);
    }
}
