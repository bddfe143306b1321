//! Burn inference backend for sequence pose prediction.
//!
//! This module provides a `BurnPredictor` that implements `SequencePredictor`
//! for running temporal body models built with the Burn framework.
//!
//! # Example
//!
//! ```ignore
//! use bodytrack_rs::integration::{BurnPredictor, BurnSequenceModel, SequenceOutput};
//! use burn::backend::NdArray;
//!
//! // Implement BurnSequenceModel for your temporal regressor
//! struct MyRegressor { /* ... */ }
//!
//! impl BurnSequenceModel<NdArray> for MyRegressor {
//!     fn forward(&self, input: burn::tensor::Tensor<NdArray, 5>) -> SequenceOutput<NdArray> {
//!         // Run inference
//!     }
//! }
//!
//! let model = MyRegressor::load("model.bin");
//! let predictor = BurnPredictor::new(model, Default::default());
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;
use ndarray::{Array2, Array3, ArrayView4, Axis};

use super::{PredictionBatch, SequencePredictor};

/// Error type for Burn prediction failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BurnPredictorError {
    /// Input crops have invalid dimensions.
    #[error("invalid input dimensions: expected {expected:?}, got {got:?}")]
    InvalidInputDimensions {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },
    /// Window is larger than the model accepts.
    #[error("window of {got} frames exceeds the model limit of {max}")]
    WindowTooLarge { max: usize, got: usize },
    /// Model output could not be read back.
    #[error("postprocessing error: {0}")]
    PostprocessingError(String),
}

/// Per-frame outputs of a Burn sequence model for a batch of one sequence.
#[derive(Debug, Clone)]
pub struct SequenceOutput<B: Backend> {
    /// [frames, 3] weak-perspective camera
    pub camera: Tensor<B, 2>,
    /// [frames, pose_dim]
    pub pose: Tensor<B, 2>,
    /// [frames, shape_dim]
    pub shape: Tensor<B, 2>,
    /// [frames, joints, 3]
    pub joints3d: Tensor<B, 3>,
    /// [frames, joints, 2] crop-normalized
    pub joints2d: Tensor<B, 3>,
}

/// Trait for Burn-based temporal body regressors.
///
/// Implement this trait for your specific model architecture.
pub trait BurnSequenceModel<B: Backend>: Send + Sync {
    /// Run forward pass on the input tensor.
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape [1, frames, channels, height, width]
    fn forward(&self, input: Tensor<B, 5>) -> SequenceOutput<B>;

    /// Get the expected crop size (channels, height, width).
    fn input_size(&self) -> (usize, usize, usize) {
        (3, 224, 224)
    }

    /// Largest number of frames per forward pass.
    fn max_window(&self) -> usize {
        16
    }
}

/// Burn-based sequence predictor implementing `SequencePredictor`.
pub struct BurnPredictor<B: Backend, M: BurnSequenceModel<B>> {
    model: M,
    device: B::Device,
}

impl<B: Backend, M: BurnSequenceModel<B>> BurnPredictor<B, M> {
    /// Create a new Burn predictor with the given model and device.
    pub fn new(model: M, device: B::Device) -> Self {
        Self { model, device }
    }

    /// Convert (frames, height, width, channels) crops into a [1, frames, channels, height, width] tensor.
    pub fn preprocess(&self, window: ArrayView4<f32>) -> Result<Tensor<B, 5>, BurnPredictorError> {
        let (frames, height, width, channels) = window.dim();
        let expected = self.model.input_size();
        if (channels, height, width) != expected {
            return Err(BurnPredictorError::InvalidInputDimensions {
                expected,
                got: (channels, height, width),
            });
        }
        if frames > self.model.max_window() {
            return Err(BurnPredictorError::WindowTooLarge {
                max: self.model.max_window(),
                got: frames,
            });
        }

        let data: Vec<f32> = window.permuted_axes([0, 3, 1, 2]).iter().copied().collect();
        Ok(Tensor::<B, 1>::from_floats(data.as_slice(), &self.device)
            .reshape([1, frames, channels, height, width]))
    }

    fn postprocess(&self, output: SequenceOutput<B>) -> Result<PredictionBatch, BurnPredictorError> {
        Ok(PredictionBatch {
            camera: to_array2(output.camera)?,
            pose: to_array2(output.pose)?,
            shape: to_array2(output.shape)?,
            joints3d: to_array3(output.joints3d)?,
            joints2d: to_array3(output.joints2d)?,
        })
    }
}

fn to_vec<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<([usize; D], Vec<f32>), BurnPredictorError> {
    let dims = tensor.dims();
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| BurnPredictorError::PostprocessingError(format!("{e:?}")))?;
    Ok((dims, values))
}

fn to_array2<B: Backend>(tensor: Tensor<B, 2>) -> Result<Array2<f32>, BurnPredictorError> {
    let ([rows, cols], values) = to_vec(tensor)?;
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| BurnPredictorError::PostprocessingError(e.to_string()))
}

fn to_array3<B: Backend>(tensor: Tensor<B, 3>) -> Result<Array3<f32>, BurnPredictorError> {
    let ([a, b, c], values) = to_vec(tensor)?;
    Array3::from_shape_vec((a, b, c), values)
        .map_err(|e| BurnPredictorError::PostprocessingError(e.to_string()))
}

impl<B: Backend, M: BurnSequenceModel<B>> SequencePredictor for BurnPredictor<B, M> {
    type Error = BurnPredictorError;

    fn max_window(&self) -> usize {
        self.model.max_window()
    }

    fn predict(&mut self, window: ArrayView4<f32>) -> Result<PredictionBatch, Self::Error> {
        let frames = window.len_of(Axis(0));
        let tensor = self.preprocess(window)?;
        let batch = self.postprocess(self.model.forward(tensor))?;
        if batch.camera.len_of(Axis(0)) != frames {
            return Err(BurnPredictorError::PostprocessingError(format!(
                "model returned {} frames for {frames}",
                batch.camera.len_of(Axis(0))
            )));
        }
        Ok(batch)
    }
}
