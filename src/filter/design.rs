//! Digital Butterworth filter design.
//!
//! Design goes through the zero/pole/gain form:
//!
//! 1. analog low-pass prototype poles on the unit circle
//! 2. cutoffs normalised by Nyquist and pre-warped for the bilinear transform
//! 3. frequency transform of the prototype to low-, high- or band-pass
//! 4. bilinear transform to the z-plane
//! 5. expansion of zeros and poles into the `b`/`a` polynomials
//!
//! Everything is done in `Complex64` and only the final polynomial
//! coefficients are reduced to their real parts.

use std::f64::consts::PI;

use num_complex::Complex64;
use tracing::trace;

use crate::error::AppResult;
use crate::filter::{FilterCoefficients, FilterFamily, FilterSpec};

/// Bilinear transform with the sampling frequency normalised to 2
/// (frequencies are expressed as fractions of Nyquist).
const FS: f64 = 2.0;

/// Zeros, poles and gain of a transfer function.
#[derive(Debug, Clone)]
struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}

/// Design the Butterworth filter described by `spec`.
///
/// Fails with [`crate::DaqError::InvalidFilterParameters`] unless
/// `0 < cutoff < nyquist` (band-pass: `0 < low < high < nyquist`) and
/// `order >= 1`.
///
/// # Example
///
/// ```
/// use scan_daq::filter::{design, FilterSpec};
///
/// let coeffs = design(&FilterSpec::low_pass(100.0, 1000.0).with_order(3))?;
/// assert_eq!(coeffs.b.len(), 4);
/// assert_eq!(coeffs.a.len(), 4);
/// # Ok::<(), scan_daq::DaqError>(())
/// ```
pub fn design(spec: &FilterSpec) -> AppResult<FilterCoefficients> {
    spec.validate()?;

    let nyquist = spec.nyquist();
    let prototype = butter_prototype(spec.order);

    let analog = match spec.family {
        FilterFamily::LowPass { cutoff } => low_pass(prototype, warp(cutoff / nyquist)),
        FilterFamily::HighPass { cutoff } => high_pass(prototype, warp(cutoff / nyquist)),
        FilterFamily::BandPass { low, high } => {
            let w0 = warp(low / nyquist);
            let w1 = warp(high / nyquist);
            band_pass(prototype, (w0 * w1).sqrt(), w1 - w0)
        }
    };

    let coefficients = to_transfer_function(bilinear(analog));
    trace!(
        family = spec.family.name(),
        order = spec.order,
        rate = spec.sampling_rate,
        taps = coefficients.taps(),
        "Designed Butterworth filter"
    );
    Ok(coefficients)
}

/// Low-pass Butterworth coefficients.
pub fn butter_lowpass(cutoff: f64, sampling_rate: f64, order: usize) -> AppResult<FilterCoefficients> {
    design(&FilterSpec::low_pass(cutoff, sampling_rate).with_order(order))
}

/// High-pass Butterworth coefficients.
pub fn butter_highpass(cutoff: f64, sampling_rate: f64, order: usize) -> AppResult<FilterCoefficients> {
    design(&FilterSpec::high_pass(cutoff, sampling_rate).with_order(order))
}

/// Band-pass Butterworth coefficients. The result has `2·order + 1` taps.
pub fn butter_bandpass(
    low: f64,
    high: f64,
    sampling_rate: f64,
    order: usize,
) -> AppResult<FilterCoefficients> {
    design(&FilterSpec::band_pass(low, high, sampling_rate).with_order(order))
}

/// Analog prototype with unit cutoff: `order` poles evenly spaced on the
/// left half of the unit circle, no zeros, unit gain.
fn butter_prototype(order: usize) -> Zpk {
    let n = order as f64;
    let poles = (0..order)
        .map(|k| {
            let m = -(n - 1.0) + 2.0 * k as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect();

    Zpk {
        zeros: Vec::new(),
        poles,
        gain: 1.0,
    }
}

/// Pre-warp a normalised digital frequency to the analog domain.
fn warp(normalized: f64) -> f64 {
    2.0 * FS * (PI * normalized / FS).tan()
}

fn low_pass(proto: Zpk, wo: f64) -> Zpk {
    let degree = (proto.poles.len() - proto.zeros.len()) as i32;
    Zpk {
        zeros: proto.zeros.iter().map(|&z| z * wo).collect(),
        poles: proto.poles.iter().map(|&p| p * wo).collect(),
        gain: proto.gain * wo.powi(degree),
    }
}

fn high_pass(proto: Zpk, wo: f64) -> Zpk {
    let degree = proto.poles.len() - proto.zeros.len();
    let num: Complex64 = proto.zeros.iter().map(|&z| -z).product();
    let den: Complex64 = proto.poles.iter().map(|&p| -p).product();

    let mut zeros: Vec<Complex64> = proto.zeros.iter().map(|&z| wo / z).collect();
    zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: proto.poles.iter().map(|&p| wo / p).collect(),
        gain: proto.gain * (num / den).re,
    }
}

fn band_pass(proto: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = proto.poles.len() - proto.zeros.len();
    let split = |roots: &[Complex64]| -> Vec<Complex64> {
        let scaled: Vec<Complex64> = roots.iter().map(|&r| r * bw / 2.0).collect();
        let upper = scaled.iter().map(|&r| r + (r * r - wo * wo).sqrt());
        let lower = scaled.iter().map(|&r| r - (r * r - wo * wo).sqrt());
        upper.chain(lower).collect()
    };

    let mut zeros = split(&proto.zeros);
    zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: split(&proto.poles),
        gain: proto.gain * bw.powi(degree as i32),
    }
}

/// Map an analog filter to the z-plane, placing the zeros lost to the
/// degree difference at Nyquist (`z = -1`).
fn bilinear(analog: Zpk) -> Zpk {
    let fs2 = Complex64::new(2.0 * FS, 0.0);
    let degree = analog.poles.len() - analog.zeros.len();

    let mut zeros: Vec<Complex64> = analog.zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
    let poles = analog.poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();

    let num: Complex64 = analog.zeros.iter().map(|&z| fs2 - z).product();
    let den: Complex64 = analog.poles.iter().map(|&p| fs2 - p).product();

    Zpk {
        zeros,
        poles,
        gain: analog.gain * (num / den).re,
    }
}

/// Monic polynomial with the given roots, highest power first.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for root in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for (i, c) in coeffs.iter().enumerate() {
            next[i + 1] -= *c * *root;
        }
        coeffs = next;
    }
    coeffs
}

fn to_transfer_function(zpk: Zpk) -> FilterCoefficients {
    FilterCoefficients {
        b: poly(&zpk.zeros).iter().map(|c| c.re * zpk.gain).collect(),
        a: poly(&zpk.poles).iter().map(|c| c.re).collect(),
    }
}
