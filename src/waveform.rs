//! Output waveform generation.
//!
//! One full cycle is sampled over the right-open phase interval `[0, 2π)`:
//! sample `i` of `length` sits at phase `2π·i/length`. No sample lands on
//! `2π`, so a buffer replayed cyclically by the hardware wraps without a
//! repeated or skipped point.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// Supported output waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformShape {
    /// `A·sin(φ) + offset`
    Sine,
    /// Symmetric triangle starting at the offset and rising to the peak at
    /// a quarter cycle
    #[default]
    Triangle,
}

impl WaveformShape {
    /// Value of a unit-amplitude wave at `phase` (radians).
    fn unit(self, phase: f64) -> f64 {
        match self {
            Self::Sine => phase.sin(),
            Self::Triangle => {
                let q = phase / std::f64::consts::TAU - 0.25;
                let s = q - (q + 0.5).floor();
                1.0 - 4.0 * s.abs()
            }
        }
    }
}

impl fmt::Display for WaveformShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sine => write!(f, "sine"),
            Self::Triangle => write!(f, "triangle"),
        }
    }
}

impl FromStr for WaveformShape {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" => Ok(Self::Sine),
            "triangle" => Ok(Self::Triangle),
            _ => Err(DaqError::UnsupportedWaveform(s.to_string())),
        }
    }
}

/// Generate one cycle of `shape` with `length` samples.
///
/// # Example
///
/// ```
/// use scan_daq::waveform::{generate, WaveformShape};
///
/// let samples = generate(WaveformShape::Triangle, 1.0, 0.5, 8);
/// assert_eq!(samples.len(), 8);
/// assert_eq!(samples[0], 0.5);
/// assert_eq!(samples[2], 1.5);
/// ```
pub fn generate(shape: WaveformShape, amplitude: f64, offset: f64, length: usize) -> Vec<f64> {
    let step = std::f64::consts::TAU / length.max(1) as f64;
    (0..length)
        .map(|i| amplitude * shape.unit(step * i as f64) + offset)
        .collect()
}

/// Generate a waveform selected by name.
///
/// Unknown names fail with [`DaqError::UnsupportedWaveform`] before any
/// sample is produced.
pub fn generate_named(
    shape: &str,
    amplitude: f64,
    offset: f64,
    length: usize,
) -> AppResult<Vec<f64>> {
    let shape: WaveformShape = shape.parse()?;
    Ok(generate(shape, amplitude, offset, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    /// Number of monotonic runs in one cycle, treating the sequence as cyclic.
    fn monotonic_segments(samples: &[f64]) -> usize {
        let n = samples.len();
        let signs: Vec<f64> = (0..n)
            .map(|i| (samples[(i + 1) % n] - samples[i]).signum())
            .collect();
        (0..n).filter(|&i| signs[i] != signs[(i + 1) % n]).count()
    }

    #[test]
    fn test_sine_mean_and_bounds() {
        for length in [1, 2, 7, 100, 1000] {
            let samples = generate(WaveformShape::Sine, 2.5, 0.0, length);
            assert_eq!(samples.len(), length);
            let mean = samples.iter().sum::<f64>() / length as f64;
            assert!(mean.abs() < 1e-9, "mean {} for length {}", mean, length);
            assert!(samples.iter().all(|v| v.abs() <= 2.5 + EPS));
        }
    }

    #[test]
    fn test_sine_starts_at_phase_zero() {
        let samples = generate(WaveformShape::Sine, 1.0, 0.25, 4);
        assert!((samples[0] - 0.25).abs() < EPS);
        assert!((samples[1] - 1.25).abs() < EPS);
        assert!((samples[3] + 0.75).abs() < EPS);
    }

    #[test]
    fn test_triangle_peak_and_trough() {
        let samples = generate(WaveformShape::Triangle, 1.0, 0.5, 100);
        let max = samples.iter().cloned().fold(f64::MIN, f64::max);
        let min = samples.iter().cloned().fold(f64::MAX, f64::min);
        assert!((max - 1.5).abs() < EPS);
        assert!((min + 0.5).abs() < EPS);
        assert!((samples[25] - 1.5).abs() < EPS);
        assert!((samples[75] + 0.5).abs() < EPS);
    }

    #[test]
    fn test_triangle_has_one_rising_and_one_falling_segment() {
        let samples = generate(WaveformShape::Triangle, 3.0, -1.0, 400);
        assert_eq!(monotonic_segments(&samples), 2);

        // Linear: constant slope magnitude away from the turning points
        let slope = (samples[1] - samples[0]).abs();
        for i in 0..399 {
            let d = (samples[i + 1] - samples[i]).abs();
            assert!((d - slope).abs() < 1e-9 || i == 99 || i == 299);
        }
    }

    #[test]
    fn test_cyclic_wrap_is_seamless() {
        let n = 64;
        let samples = generate(WaveformShape::Triangle, 1.0, 0.0, n);
        let step = samples[1] - samples[0];
        // Replaying from the end back to the start continues the slope
        assert!((samples[0] - samples[n - 1] - step).abs() < EPS);
    }

    #[test]
    fn test_unsupported_shape() {
        let err = generate_named("quadrature", 1.0, 0.0, 16).unwrap_err();
        assert!(matches!(err, DaqError::UnsupportedWaveform(ref s) if s == "quadrature"));
    }

    #[test]
    fn test_named_shapes() {
        assert_eq!("Sine".parse::<WaveformShape>().unwrap(), WaveformShape::Sine);
        assert_eq!(
            generate_named("triangle", 1.0, 0.0, 8).unwrap(),
            generate(WaveformShape::Triangle, 1.0, 0.0, 8)
        );
    }

    #[test]
    fn test_zero_length() {
        assert!(generate(WaveformShape::Sine, 1.0, 0.0, 0).is_empty());
    }
}
