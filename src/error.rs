//! Error type shared by the reconstruction core and its integrations.

use thiserror::Error;

use crate::motion::SubjectId;

/// Boxed error raised by an external collaborator (predictor, body model, frame source).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "subject {subject_id}: {frames} frames but {bboxes} boxes and {joints2d:?} keypoint sets"
    )]
    TrackLengthMismatch {
        subject_id: SubjectId,
        frames: usize,
        bboxes: usize,
        joints2d: Option<usize>,
    },

    #[error("subject {subject_id}: frame indices must be strictly increasing (at position {position})")]
    UnorderedFrames {
        subject_id: SubjectId,
        position: usize,
    },

    #[error("subject {subject_id}: neither boxes nor keypoints were supplied")]
    MissingBoxes { subject_id: SubjectId },

    #[error("degenerate bounding box: width {width}, height {height}")]
    DegenerateBox { width: f32, height: f32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("predictor returned {got} frames for a window of {expected}")]
    PartialBatch { expected: usize, got: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("sequence predictor failed: {0}")]
    Predictor(#[source] CollaboratorError),

    #[error("body model failed: {0}")]
    BodyModel(#[source] CollaboratorError),

    #[error("frame source failed on frame {frame}: {source}")]
    FrameSource {
        frame: usize,
        #[source]
        source: CollaboratorError,
    },

    #[error("frame {frame} has an empty image")]
    EmptyFrame { frame: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Array(#[from] ndarray::ShapeError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
