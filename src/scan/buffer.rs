//! Fixed-capacity sample buffer shared between a scan session and the
//! hardware scan service.
//!
//! The buffer is the only state the hardware side and the controller share.
//! While an input scan runs, the service writes into it with wrap-around and
//! the controller copies it out with [`ScanBuffer::snapshot`]. A snapshot is
//! best-effort: it may mix samples from the current and the previous pass over
//! the buffer if a wrap boundary is crossed between writes (a torn read).
//! Consumers that need a coherent block should use finite scans and read
//! after completion.
//!
//! Output buffers are filled once before the scan starts and afterwards only
//! read by the service. The owning session enforces that.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AppResult, DaqError};

/// Shared, fixed-capacity buffer of samples.
///
/// Cloning shares the underlying storage.
#[derive(Clone)]
pub struct ScanBuffer {
    samples: Arc<RwLock<Vec<f64>>>,
}

impl ScanBuffer {
    /// Zero-filled buffer holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Arc::new(RwLock::new(vec![0.0; capacity])),
        }
    }

    /// Number of samples the buffer holds.
    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    /// Whether the buffer has zero capacity.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.read().clone()
    }

    /// Sample at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.samples.read().get(index).copied()
    }

    /// Arithmetic mean of the current contents.
    pub fn mean(&self) -> Option<f64> {
        let samples = self.samples.read();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Write `data` starting at `start`, wrapping at the end of the buffer.
    ///
    /// Returns the index following the last written sample. This is the write
    /// path used by scan services filling an input buffer.
    pub fn write_wrapping(&self, start: usize, data: &[f64]) -> usize {
        let mut samples = self.samples.write();
        let capacity = samples.len();
        if capacity == 0 {
            return 0;
        }

        let mut index = start % capacity;
        for &value in data {
            samples[index] = value;
            index = (index + 1) % capacity;
        }
        index
    }

    /// Replace the whole contents. `data` must match the capacity.
    pub(crate) fn fill(&self, data: &[f64]) -> AppResult<()> {
        let mut samples = self.samples.write();
        if data.len() != samples.len() {
            return Err(DaqError::InvalidScanConfig(format!(
                "Waveform has {} samples but the output buffer holds {}",
                data.len(),
                samples.len()
            )));
        }
        samples.copy_from_slice(data);
        Ok(())
    }
}

impl std::fmt::Debug for ScanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanBuffer")
            .field("capacity", &self.len())
            .finish()
    }
}
