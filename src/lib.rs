//! Temporally consistent 3D body reconstruction from person tracklets.
//!
//! Each tracked subject is cropped frame by frame, run through a sequence
//! pose predictor in fixed windows, optionally refined against observed 2D
//! keypoints and smoothed with a one-euro filter, and finally mapped back to
//! original-image coordinates. Results of all subjects can then be regrouped
//! per frame for rendering.
//!
//! The predictor, the parametric body model and the frame decoder are
//! collaborators behind the [`SequencePredictor`], [`BodyModel`] and
//! [`FrameSource`] traits.

pub mod config;
pub mod error;
pub mod integration;
pub mod motion;

pub use config::{PipelineConfig, RefineConfig, SmoothConfig};
pub use error::{Error, Result};
pub use integration::{
    FrameSource, InMemoryFrames, PredictionBatch, ReconstructionPipeline, RunReport,
    SequencePredictor, SubjectFailure, TrackBuilder,
};
pub use motion::{
    BBox, BodyModel, BodyOutput, FrameRenderSet, FrameRenderer, PersonResult, SubjectId, Track,
    TrackInput,
};
