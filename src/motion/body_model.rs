//! Parametric body model contract: pose + shape in, mesh vertices + 3D joints out.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};

use crate::error::{Error, Result};

/// Output of one body model evaluation.
#[derive(Debug, Clone)]
pub struct BodyOutput {
    /// Mesh vertices, shape (vertices, 3)
    pub vertices: Array2<f32>,
    /// 3D joints, shape (joints, 3)
    pub joints3d: Array2<f32>,
}

/// Parametric body model used to regenerate geometry from smoothed or refined parameters.
///
/// Implementations must be deterministic: the same parameters always yield
/// the same geometry.
pub trait BodyModel {
    /// Error type for model evaluation failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Evaluate the model for one frame.
    fn forward(
        &self,
        pose: ArrayView1<f32>,
        shape: ArrayView1<f32>,
    ) -> Result<BodyOutput, Self::Error>;

    /// 3D joints only. Override when joints are cheaper than the full mesh.
    fn joints(
        &self,
        pose: ArrayView1<f32>,
        shape: ArrayView1<f32>,
    ) -> Result<Array2<f32>, Self::Error> {
        self.forward(pose, shape).map(|out| out.joints3d)
    }
}

/// Evaluate the model for every frame of a (frames, pose) / (frames, shape) sequence.
///
/// Returns vertices (frames, vertices, 3) and joints (frames, joints, 3).
pub fn forward_sequence<M: BodyModel>(
    model: &M,
    pose: ArrayView2<f32>,
    shape: ArrayView2<f32>,
) -> Result<(Array3<f32>, Array3<f32>)> {
    let frames = pose.len_of(Axis(0));
    if shape.len_of(Axis(0)) != frames {
        return Err(Error::ShapeMismatch(format!(
            "{} pose frames but {} shape frames",
            frames,
            shape.len_of(Axis(0))
        )));
    }

    let mut vertices = Vec::with_capacity(frames);
    let mut joints = Vec::with_capacity(frames);
    for (p, b) in pose.outer_iter().zip(shape.outer_iter()) {
        let out = model
            .forward(p, b)
            .map_err(|e| Error::BodyModel(Box::new(e)))?;
        vertices.push(out.vertices);
        joints.push(out.joints3d);
    }

    Ok((stack_frames(&vertices)?, stack_frames(&joints)?))
}

fn stack_frames(frames: &[Array2<f32>]) -> Result<Array3<f32>> {
    if frames.is_empty() {
        return Ok(Array3::zeros((0, 0, 3)));
    }
    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}
