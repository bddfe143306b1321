//! Causal one-euro smoothing of pose/shape sequences.

use ndarray::{Array2, Array3, ArrayView2, Axis};

use crate::config::SmoothConfig;
use crate::error::{Error, Result};
use crate::motion::body_model::{BodyModel, forward_sequence};
use crate::motion::one_euro::OneEuroFilter;

/// Smoothed parameters together with the geometry regenerated from them.
#[derive(Debug, Clone)]
pub struct SmoothedSequence {
    pub pose: Array2<f32>,
    pub shape: Array2<f32>,
    pub vertices: Array3<f32>,
    pub joints3d: Array3<f32>,
}

#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    config: SmoothConfig,
}

impl TemporalSmoother {
    /// Parameters are validated here, before any sequence is filtered.
    pub fn new(config: SmoothConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SmoothConfig {
        &self.config
    }

    /// Filter a (frames, channels) sequence sampled at `frame_ids`.
    ///
    /// Frames are visited in order; the time step is the gap between
    /// successive frame ids, so a skipped frame counts as two steps.
    pub fn smooth_channels(&self, values: ArrayView2<f32>, frame_ids: &[usize]) -> Result<Array2<f32>> {
        if values.len_of(Axis(0)) != frame_ids.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} rows to smooth for {} frames",
                values.len_of(Axis(0)),
                frame_ids.len()
            )));
        }

        let mut filter = OneEuroFilter::new(
            self.config.min_cutoff,
            self.config.beta,
            self.config.d_cutoff,
        );
        let mut out = Array2::zeros(values.raw_dim());
        let mut prev_frame = None;
        for ((row, &frame), mut dst) in values
            .outer_iter()
            .zip(frame_ids)
            .zip(out.outer_iter_mut())
        {
            let te = prev_frame.map_or(1.0, |p: usize| frame.saturating_sub(p).max(1) as f32);
            dst.assign(&filter.filter(row, te));
            prev_frame = Some(frame);
        }
        Ok(out)
    }

    /// Smooth pose (and shape, if enabled) and regenerate vertices and joints.
    pub fn smooth<M: BodyModel>(
        &self,
        model: &M,
        pose: ArrayView2<f32>,
        shape: ArrayView2<f32>,
        frame_ids: &[usize],
    ) -> Result<SmoothedSequence> {
        let pose = self.smooth_channels(pose, frame_ids)?;
        let shape = if self.config.smooth_shape {
            self.smooth_channels(shape, frame_ids)?
        } else {
            shape.to_owned()
        };
        let (vertices, joints3d) = forward_sequence(model, pose.view(), shape.view())?;
        Ok(SmoothedSequence {
            pose,
            shape,
            vertices,
            joints3d,
        })
    }
}
