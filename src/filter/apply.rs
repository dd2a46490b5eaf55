//! Zero-phase filtering of bounded sample buffers.
//!
//! [`apply`] runs the filter forward, reverses, runs it again and reverses
//! back. Phase shifts cancel and the magnitude response is squared. The
//! sequence is extended at both ends by an odd reflection of `3·taps`
//! samples and each pass starts from the filter's steady state for the edge
//! value, which keeps start-up transients out of the result.

use tracing::trace;

use crate::error::{AppResult, DaqError};
use crate::filter::design::{butter_bandpass, butter_highpass, butter_lowpass};
use crate::filter::FilterCoefficients;

/// Coefficients normalised by `a[0]` and padded to equal length.
struct Normalized {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl Normalized {
    fn new(coefficients: &FilterCoefficients) -> AppResult<Self> {
        let a0 = coefficients.a.first().copied().unwrap_or(0.0);
        if a0 == 0.0 || !a0.is_finite() || coefficients.b.is_empty() {
            return Err(DaqError::InvalidFilterParameters(
                "Leading feedback coefficient must be non-zero".to_string(),
            ));
        }

        let taps = coefficients.taps();
        let pad = |v: &[f64]| -> Vec<f64> {
            let mut out: Vec<f64> = v.iter().map(|x| x / a0).collect();
            out.resize(taps, 0.0);
            out
        };

        Ok(Self {
            b: pad(&coefficients.b),
            a: pad(&coefficients.a),
        })
    }

    fn taps(&self) -> usize {
        self.b.len()
    }

    /// Direct form II transposed, starting from `state` (length `taps - 1`).
    fn run(&self, samples: impl Iterator<Item = f64>, mut state: Vec<f64>) -> Vec<f64> {
        let n = self.taps();
        let (b, a) = (&self.b, &self.a);

        samples
            .map(|x| {
                let y = b[0] * x + state.first().copied().unwrap_or(0.0);
                for i in 0..n.saturating_sub(1) {
                    let next = if i + 1 < n - 1 { state[i + 1] } else { 0.0 };
                    state[i] = b[i + 1] * x + next - a[i + 1] * y;
                }
                y
            })
            .collect()
    }

    /// Steady-state of the delay line for a unit step input.
    fn step_state(&self) -> Vec<f64> {
        let n = self.taps();
        if n < 2 {
            return Vec::new();
        }
        let (b, a) = (&self.b, &self.a);

        let mut zi = vec![0.0; n - 1];
        let numerator: f64 = (1..n).map(|k| b[k] - a[k] * b[0]).sum();
        zi[0] = numerator / a.iter().sum::<f64>();

        let mut a_sum = 1.0;
        let mut c_sum = 0.0;
        for k in 1..n - 1 {
            a_sum += a[k];
            c_sum += b[k] - a[k] * b[0];
            zi[k] = a_sum * zi[0] - c_sum;
        }
        zi
    }
}

/// Single causal pass of the filter with zero initial state.
///
/// Introduces the filter's phase lag; use [`apply`] for zero-phase output.
pub fn lfilter(coefficients: &FilterCoefficients, samples: &[f64]) -> AppResult<Vec<f64>> {
    let filter = Normalized::new(coefficients)?;
    let state = vec![0.0; filter.taps().saturating_sub(1)];
    Ok(filter.run(samples.iter().copied(), state))
}

/// Steady-state delay-line values for a unit step, scaled by the caller to
/// start a pass without a transient.
pub fn lfilter_zi(coefficients: &FilterCoefficients) -> AppResult<Vec<f64>> {
    Ok(Normalized::new(coefficients)?.step_state())
}

/// Zero-phase (forward-backward) filtering of a bounded buffer.
///
/// The output has the same length as `samples`. Buffers not longer than
/// `3·taps` fail with [`DaqError::InsufficientSamples`].
///
/// # Example
///
/// ```
/// use scan_daq::filter::{apply, design, FilterSpec};
///
/// let coeffs = design(&FilterSpec::low_pass(50.0, 1000.0))?;
/// let filtered = apply(&coeffs, &[1.0; 100])?;
/// assert!(filtered.iter().all(|v| (v - 1.0).abs() < 1e-9));
/// # Ok::<(), scan_daq::DaqError>(())
/// ```
pub fn apply(coefficients: &FilterCoefficients, samples: &[f64]) -> AppResult<Vec<f64>> {
    let filter = Normalized::new(coefficients)?;
    let pad = 3 * filter.taps();
    let len = samples.len();
    if len <= pad {
        return Err(DaqError::InsufficientSamples {
            required: pad,
            actual: len,
        });
    }

    let first = samples[0];
    let last = samples[len - 1];
    let extended: Vec<f64> = (1..=pad)
        .rev()
        .map(|i| 2.0 * first - samples[i])
        .chain(samples.iter().copied())
        .chain((len - 1 - pad..len - 1).rev().map(|i| 2.0 * last - samples[i]))
        .collect();

    let zi = filter.step_state();
    let scaled = |scale: f64| zi.iter().map(|z| z * scale).collect::<Vec<_>>();

    let forward = filter.run(extended.iter().copied(), scaled(extended[0]));
    let edge = forward.last().copied().unwrap_or(0.0);
    let mut backward = filter.run(forward.iter().rev().copied(), scaled(edge));
    backward.reverse();

    trace!(samples = len, taps = filter.taps(), pad, "Applied zero-phase filter");
    Ok(backward[pad..pad + len].to_vec())
}

/// Design a low-pass Butterworth filter and apply it with zero phase.
pub fn lowpass_filter(
    samples: &[f64],
    cutoff: f64,
    sampling_rate: f64,
    order: usize,
) -> AppResult<Vec<f64>> {
    apply(&butter_lowpass(cutoff, sampling_rate, order)?, samples)
}

/// Design a high-pass Butterworth filter and apply it with zero phase.
pub fn highpass_filter(
    samples: &[f64],
    cutoff: f64,
    sampling_rate: f64,
    order: usize,
) -> AppResult<Vec<f64>> {
    apply(&butter_highpass(cutoff, sampling_rate, order)?, samples)
}

/// Design a band-pass Butterworth filter and apply it with zero phase.
pub fn bandpass_filter(
    samples: &[f64],
    low: f64,
    high: f64,
    sampling_rate: f64,
    order: usize,
) -> AppResult<Vec<f64>> {
    apply(&butter_bandpass(low, high, sampling_rate, order)?, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine(freq: f64, rate: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (TAU * freq * i as f64 / rate).sin())
            .collect()
    }

    fn argmax(samples: &[f64]) -> usize {
        samples
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
            .0
    }

    #[test]
    fn test_lfilter_moving_average() {
        let coeffs = FilterCoefficients {
            b: vec![0.5, 0.5],
            a: vec![1.0],
        };
        let y = lfilter(&coeffs, &[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(y, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_lfilter_normalises_leading_coefficient() {
        let coeffs = FilterCoefficients {
            b: vec![2.0],
            a: vec![2.0, -1.0],
        };
        // y[n] = x[n] + 0.5 y[n-1]
        let y = lfilter(&coeffs, &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(y, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_zi_gives_step_steady_state() {
        let coeffs = butter_lowpass(100.0, 1000.0, 4).unwrap();
        let filter = Normalized::new(&coeffs).unwrap();
        let y = filter.run(std::iter::repeat(1.0).take(50), filter.step_state());
        assert!(y.iter().all(|v| (v - 1.0).abs() < 1e-9));
        assert_eq!(lfilter_zi(&coeffs).unwrap().len(), coeffs.taps() - 1);
    }

    #[test]
    fn test_output_length_and_purity() {
        let x = sine(7.0, 1000.0, 500);
        let coeffs = butter_lowpass(40.0, 1000.0, 5).unwrap();
        let y = apply(&coeffs, &x).unwrap();
        assert_eq!(y.len(), x.len());
        assert_eq!(y, apply(&coeffs, &x).unwrap());
    }

    #[test]
    fn test_near_pass_through() {
        let x = sine(5.0, 1000.0, 1000);
        let y = lowpass_filter(&x, 475.0, 1000.0, 5).unwrap();
        for (a, b) in x.iter().zip(&y) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn test_zero_phase_preserves_peak_location() {
        let rate = 1000.0;
        let x = sine(5.0, rate, 1000);
        let coeffs = butter_lowpass(50.0, rate, 4).unwrap();

        // Third cycle peaks at sample 450
        let window = 400..600;
        let zero_phase = apply(&coeffs, &x).unwrap();
        let peak = window.start + argmax(&zero_phase[window.clone()]);
        assert!((peak as i64 - 450).abs() <= 1, "peak at {}", peak);

        let causal = lfilter(&coeffs, &x).unwrap();
        let lagged = window.start + argmax(&causal[window]);
        assert!(lagged > 453, "causal peak at {}", lagged);
    }

    #[test]
    fn test_highpass_removes_offset() {
        let x: Vec<f64> = sine(100.0, 1000.0, 600).iter().map(|v| v + 3.0).collect();
        let y = highpass_filter(&x, 10.0, 1000.0, 3).unwrap();
        let mean = y[100..500].iter().sum::<f64>() / 400.0;
        assert!(mean.abs() < 0.05, "mean {}", mean);
    }

    #[test]
    fn test_bandpass_keeps_in_band_tone() {
        let x = sine(50.0, 1000.0, 1000);
        let y = bandpass_filter(&x, 30.0, 70.0, 1000.0, 3).unwrap();
        let peak = y[300..700].iter().cloned().fold(f64::MIN, f64::max);
        assert!((peak - 1.0).abs() < 0.05, "peak {}", peak);
    }

    #[test]
    fn test_insufficient_samples() {
        let coeffs = butter_lowpass(100.0, 1000.0, 5).unwrap();
        let err = apply(&coeffs, &[0.0; 18]).unwrap_err();
        assert!(matches!(
            err,
            DaqError::InsufficientSamples {
                required: 18,
                actual: 18
            }
        ));
        assert!(apply(&coeffs, &[0.0; 19]).is_ok());
    }
}
