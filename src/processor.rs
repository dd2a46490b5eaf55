//! Staged post-processing of acquired snapshots.
//!
//! A [`ProcessingPipeline`] threads a snapshot through three ordered stage
//! lists: preprocess, process and postprocess. Each [`Stage`] maps a whole
//! buffer to a new buffer, so stages that need the full sequence (zero-phase
//! filtering) compose with simple element-wise ones.
//!
//! ```
//! use scan_daq::filter::FilterSpec;
//! use scan_daq::processor::{FilterStage, ProcessingPipeline, RemoveMean, Scale};
//!
//! let pipeline = ProcessingPipeline::new()
//!     .preprocess(RemoveMean)
//!     .process(FilterStage::new(FilterSpec::low_pass(50.0, 1000.0))?)
//!     .postprocess(Scale::new(1000.0));
//! let out = pipeline.run(&[0.5; 200])?;
//! assert!(out.iter().all(|v| v.abs() < 1e-6));
//! # Ok::<(), scan_daq::DaqError>(())
//! ```

use tracing::debug;

use crate::error::AppResult;
use crate::filter::{apply, design, FilterCoefficients, FilterSpec};

/// One step of a [`ProcessingPipeline`].
pub trait Stage: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Map `samples` to a new buffer.
    fn process(&self, samples: &[f64]) -> AppResult<Vec<f64>>;
}

/// Zero-phase Butterworth filter, designed once at construction.
#[derive(Debug, Clone)]
pub struct FilterStage {
    spec: FilterSpec,
    coefficients: FilterCoefficients,
}

impl FilterStage {
    /// Design the filter for `spec`.
    pub fn new(spec: FilterSpec) -> AppResult<Self> {
        let coefficients = design(&spec)?;
        Ok(Self { spec, coefficients })
    }

    /// Filter description.
    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    /// Designed coefficients.
    pub fn coefficients(&self) -> &FilterCoefficients {
        &self.coefficients
    }
}

impl Stage for FilterStage {
    fn name(&self) -> &str {
        self.spec.family.name()
    }

    fn process(&self, samples: &[f64]) -> AppResult<Vec<f64>> {
        apply(&self.coefficients, samples)
    }
}

/// Subtract the buffer mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveMean;

impl Stage for RemoveMean {
    fn name(&self) -> &str {
        "remove-mean"
    }

    fn process(&self, samples: &[f64]) -> AppResult<Vec<f64>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Ok(samples.iter().map(|v| v - mean).collect())
    }
}

/// Multiply every sample by a constant, e.g. volts to millivolts.
#[derive(Debug, Clone, Copy)]
pub struct Scale {
    factor: f64,
}

impl Scale {
    /// Scale by `factor`.
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Stage for Scale {
    fn name(&self) -> &str {
        "scale"
    }

    fn process(&self, samples: &[f64]) -> AppResult<Vec<f64>> {
        Ok(samples.iter().map(|v| v * self.factor).collect())
    }
}

/// Ordered preprocess, process and postprocess stages.
#[derive(Default)]
pub struct ProcessingPipeline {
    preprocess: Vec<Box<dyn Stage>>,
    process: Vec<Box<dyn Stage>>,
    postprocess: Vec<Box<dyn Stage>>,
}

impl ProcessingPipeline {
    /// Empty pipeline; `run` returns its input unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a preprocessing stage.
    pub fn preprocess(mut self, stage: impl Stage + 'static) -> Self {
        self.preprocess.push(Box::new(stage));
        self
    }

    /// Append a processing stage.
    pub fn process(mut self, stage: impl Stage + 'static) -> Self {
        self.process.push(Box::new(stage));
        self
    }

    /// Append a postprocessing stage.
    pub fn postprocess(mut self, stage: impl Stage + 'static) -> Self {
        self.postprocess.push(Box::new(stage));
        self
    }

    /// Total number of stages.
    pub fn len(&self) -> usize {
        self.preprocess.len() + self.process.len() + self.postprocess.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages().map(|s| s.name()).collect()
    }

    /// Run `samples` through every stage, stopping at the first error.
    pub fn run(&self, samples: &[f64]) -> AppResult<Vec<f64>> {
        let mut data = samples.to_vec();
        for stage in self.stages() {
            data = stage.process(&data)?;
            debug!(stage = stage.name(), samples = data.len(), "Processing stage complete");
        }
        Ok(data)
    }

    fn stages(&self) -> impl Iterator<Item = &dyn Stage> {
        self.preprocess
            .iter()
            .chain(&self.process)
            .chain(&self.postprocess)
            .map(|s| s.as_ref())
    }
}

impl std::fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
