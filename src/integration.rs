//! Integration module for connecting pose predictors, body models and video
//! frames with the reconstruction core.
//!
//! This module provides the collaborator traits and the end-to-end pipeline.
//! Inference backends (Burn, ONNX Runtime, etc.) plug in through
//! [`SequencePredictor`].

mod builder;
mod frames;
mod pipeline;
mod predictor;

pub use builder::TrackBuilder;
pub use frames::{FrameSource, InMemoryFrames, MissingFrame};
pub use pipeline::{ReconstructionPipeline, RunReport, SubjectFailure};
pub use predictor::{PredictionBatch, SequencePredictor, predict_sequence};

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnPredictor, BurnPredictorError, BurnSequenceModel, SequenceOutput};
