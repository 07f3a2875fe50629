//! Loading volumes from trace-oriented sources such as seismic containers

use crate::error::{Result, VolumeError};
use crate::store::VolumeStore;
use ndarray::{s, Array3, ArrayView1};
use std::ops::RangeInclusive;
use tracing::info;

/// Per-trace access to a 3D dataset.
///
/// A trace is addressed by two cross-line indices and holds a fixed number of
/// samples. The slow index becomes volume axis 1, the fast index axis 2 and
/// the samples axis 3.
pub trait TraceSource {
    /// Valid values of the slow cross-line index
    fn slow_range(&self) -> RangeInclusive<usize>;

    /// Valid values of the fast cross-line index
    fn fast_range(&self) -> RangeInclusive<usize>;

    fn samples_per_trace(&self) -> usize;

    /// Samples of one trace, at least `samples_per_trace` long
    fn trace(&self, fast: usize, slow: usize) -> Result<Vec<f32>>;
}

/// Copy every trace of `source` into the volume, starting at local (0, 0, 0)
pub fn populate_from_traces<S>(store: &VolumeStore, source: &S) -> Result<()>
where
    S: TraceSource + ?Sized,
{
    let slow = source.slow_range();
    let fast = source.fast_range();
    let samples = source.samples_per_trace();
    let shape = (slow.clone().count(), fast.clone().count(), samples);
    info!(?shape, "populating volume from traces");

    let mut data = Array3::<f32>::zeros(shape);
    for (a, i_slow) in slow.enumerate() {
        for (b, i_fast) in fast.clone().enumerate() {
            let trace = source.trace(i_fast, i_slow)?;
            if trace.len() < samples {
                return Err(VolumeError::DimensionMismatch(format!(
                    "trace ({}, {}) has {} samples, expected {}",
                    i_fast,
                    i_slow,
                    trace.len(),
                    samples
                )));
            }
            data.slice_mut(s![a, b, ..])
                .assign(&ArrayView1::from(&trace[..samples]));
        }
    }

    store.write_region([0, 0, 0], data.view())
}
