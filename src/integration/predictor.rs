//! Trait for sequence pose predictors, and the chunked invocation over a whole track.

use ndarray::{Array2, Array3, ArrayView4, Axis, concatenate, s};

use crate::error::{Error, Result};

/// Per-frame predictions for one window, all in crop-local terms.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionBatch {
    /// (frames, 3) weak-perspective camera (s, tx, ty)
    pub camera: Array2<f32>,
    /// (frames, pose_dim) joint rotations
    pub pose: Array2<f32>,
    /// (frames, shape_dim) shape coefficients
    pub shape: Array2<f32>,
    /// (frames, joints, 3)
    pub joints3d: Array3<f32>,
    /// (frames, joints, 2) in crop-normalized [-1, 1] coordinates
    pub joints2d: Array3<f32>,
}

impl PredictionBatch {
    /// Number of frames, checked to agree across every field.
    pub fn frames(&self) -> Result<usize> {
        let n = self.camera.len_of(Axis(0));
        let others = [
            self.pose.len_of(Axis(0)),
            self.shape.len_of(Axis(0)),
            self.joints3d.len_of(Axis(0)),
            self.joints2d.len_of(Axis(0)),
        ];
        if others.iter().any(|&m| m != n) {
            return Err(Error::ShapeMismatch(format!(
                "prediction fields disagree on frame count: camera {n}, others {others:?}"
            )));
        }
        if self.camera.len_of(Axis(1)) != 3 {
            return Err(Error::ShapeMismatch(format!(
                "camera must have 3 values per frame, got {}",
                self.camera.len_of(Axis(1))
            )));
        }
        if self.joints3d.len_of(Axis(2)) != 3 {
            return Err(Error::ShapeMismatch(format!(
                "3D joints must have 3 coordinates, got {}",
                self.joints3d.len_of(Axis(2))
            )));
        }
        if self.joints2d.len_of(Axis(2)) < 2 {
            return Err(Error::ShapeMismatch(format!(
                "2D joints need at least 2 coordinates, got {}",
                self.joints2d.len_of(Axis(2))
            )));
        }
        Ok(n)
    }

    /// Concatenate batches along the frame axis, preserving order.
    pub fn concat(batches: &[PredictionBatch]) -> Result<Self> {
        let Some(first) = batches.first() else {
            return Err(Error::ShapeMismatch("no prediction batches to join".into()));
        };
        if batches.len() == 1 {
            return Ok(first.clone());
        }

        let camera: Vec<_> = batches.iter().map(|b| b.camera.view()).collect();
        let pose: Vec<_> = batches.iter().map(|b| b.pose.view()).collect();
        let shape: Vec<_> = batches.iter().map(|b| b.shape.view()).collect();
        let joints3d: Vec<_> = batches.iter().map(|b| b.joints3d.view()).collect();
        let joints2d: Vec<_> = batches.iter().map(|b| b.joints2d.view()).collect();

        Ok(Self {
            camera: concatenate(Axis(0), &camera)?,
            pose: concatenate(Axis(0), &pose)?,
            shape: concatenate(Axis(0), &shape)?,
            joints3d: concatenate(Axis(0), &joints3d)?,
            joints2d: concatenate(Axis(0), &joints2d)?,
        })
    }
}

/// Trait for sequence pose predictors.
///
/// Implement this trait to connect any temporal body model to the pipeline.
/// A call receives consecutive crops of one subject and must return exactly
/// one prediction per crop, in input order. Identical input yields identical
/// output; no state is carried between calls.
///
/// # Example
///
/// ```ignore
/// use bodytrack_rs::{PredictionBatch, SequencePredictor};
///
/// struct MyPredictor {
///     // Your model here
/// }
///
/// impl SequencePredictor for MyPredictor {
///     type Error = std::io::Error;
///
///     fn max_window(&self) -> usize {
///         64
///     }
///
///     fn predict(&mut self, window: ArrayView4<f32>) -> Result<PredictionBatch, Self::Error> {
///         // Run inference and return one row per crop
///         todo!()
///     }
/// }
/// ```
pub trait SequencePredictor {
    /// Error type for prediction failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Largest number of crops accepted in one call.
    fn max_window(&self) -> usize;

    /// Run inference on a window of crops.
    ///
    /// # Arguments
    /// * `window` - Crops of shape (frames, crop_size, crop_size, 3), `frames <= max_window()`
    fn predict(&mut self, window: ArrayView4<f32>) -> Result<PredictionBatch, Self::Error>;
}

/// Run `predictor` over all `crops` in consecutive chunks and join the results.
///
/// Chunks hold at most `min(chunk_len, predictor.max_window())` frames, never
/// overlap and leave no gaps. Every chunk must come back complete.
pub fn predict_sequence<P: SequencePredictor>(
    predictor: &mut P,
    crops: ArrayView4<f32>,
    chunk_len: usize,
) -> Result<PredictionBatch> {
    let window = chunk_len.min(predictor.max_window());
    if window == 0 {
        return Err(Error::InvalidConfig(
            "predictor window must hold at least one frame".into(),
        ));
    }

    let total = crops.len_of(Axis(0));
    let mut batches = Vec::with_capacity(total.div_ceil(window));
    for start in (0..total).step_by(window) {
        let end = (start + window).min(total);
        let batch = predictor
            .predict(crops.slice(s![start..end, .., .., ..]))
            .map_err(|e| Error::Predictor(Box::new(e)))?;
        let got = batch.frames()?;
        if got != end - start {
            return Err(Error::PartialBatch {
                expected: end - start,
                got,
            });
        }
        batches.push(batch);
    }

    tracing::debug!(frames = total, window, chunks = batches.len(), "predicted sequence");
    if batches.is_empty() {
        return Err(Error::ShapeMismatch("cannot predict an empty sequence".into()));
    }
    PredictionBatch::concat(&batches)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Predictor whose outputs encode the first pixel of each crop, so order is observable.
    pub struct EchoPredictor {
        pub max_window: usize,
        pub calls: Vec<usize>,
    }

    impl EchoPredictor {
        pub fn new(max_window: usize) -> Self {
            Self {
                max_window,
                calls: Vec::new(),
            }
        }
    }

    impl SequencePredictor for EchoPredictor {
        type Error = std::convert::Infallible;

        fn max_window(&self) -> usize {
            self.max_window
        }

        fn predict(&mut self, window: ArrayView4<f32>) -> Result<PredictionBatch, Self::Error> {
            let n = window.len_of(Axis(0));
            self.calls.push(n);
            let tag = |i: usize| window[[i, 0, 0, 0]];
            Ok(PredictionBatch {
                camera: Array2::from_shape_fn((n, 3), |(i, c)| if c == 0 { 1.0 } else { tag(i) }),
                pose: Array2::from_shape_fn((n, 4), |(i, _)| tag(i)),
                shape: Array2::from_shape_fn((n, 2), |(i, _)| tag(i)),
                joints3d: Array3::from_shape_fn((n, 3, 3), |(i, _, _)| tag(i)),
                joints2d: Array3::zeros((n, 3, 2)),
            })
        }
    }
}
