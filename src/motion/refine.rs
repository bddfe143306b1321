//! Keypoint-driven refinement of a predicted sequence, and the per-frame merge.
//!
//! Refinement runs once over the whole sequence. It first refits each frame's
//! weak-perspective camera to the observed keypoints in closed form, then
//! runs normalized gradient descent on pose, shape and camera against a
//! robust reprojection loss with pose/shape priors and a temporal pose
//! smoothness term. A frame is marked for update only when its refined
//! reprojection loss beats the original one.

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array, Array1, Array2, Array3, ArrayView, ArrayView1, ArrayView2, ArrayView3, Axis, Dimension, RemoveAxis};

use crate::config::RefineConfig;
use crate::error::{Error, Result};
use crate::motion::body_model::{BodyModel, forward_sequence};
use crate::motion::remap::{CropCamera, project_joints};

/// Parameters of one subject's sequence as predicted.
#[derive(Debug, Clone, Copy)]
pub struct RefineInput<'a> {
    /// (frames, pose_dim)
    pub pose: ArrayView2<'a, f32>,
    /// (frames, shape_dim)
    pub shape: ArrayView2<'a, f32>,
    /// (frames, 3) crop cameras
    pub camera: ArrayView2<'a, f32>,
    /// (frames, joints, 3) crop-normalized keypoints with confidence
    pub keypoints: ArrayView3<'a, f32>,
}

/// Candidate sequence produced by refinement, aligned with the input.
#[derive(Debug, Clone)]
pub struct RefinedSequence {
    pub pose: Array2<f32>,
    pub shape: Array2<f32>,
    pub camera: Array2<f32>,
    pub vertices: Array3<f32>,
    pub joints3d: Array3<f32>,
    /// Crop-normalized projection of `joints3d`
    pub joints2d: Array3<f32>,
}

#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub refined: RefinedSequence,
    /// `update[t]` is true when frame `t` should take the refined values
    pub update: Vec<bool>,
    pub original_loss: Array1<f32>,
    pub refined_loss: Array1<f32>,
}

impl RefinementOutcome {
    pub fn updated_count(&self) -> usize {
        self.update.iter().filter(|&&u| u).count()
    }
}

/// Take the rows of `refined` where `update` is set and the rows of `original` elsewhere.
///
/// Neither input is modified; the result is a new array.
pub fn merge_rows<A, D>(
    original: ArrayView<A, D>,
    refined: ArrayView<A, D>,
    update: &[bool],
) -> Result<Array<A, D>>
where
    A: Clone,
    D: Dimension + RemoveAxis,
{
    if original.shape() != refined.shape() {
        return Err(Error::ShapeMismatch(format!(
            "cannot merge {:?} with {:?}",
            original.shape(),
            refined.shape()
        )));
    }
    if original.len_of(Axis(0)) != update.len() {
        return Err(Error::ShapeMismatch(format!(
            "update mask of {} for {} frames",
            update.len(),
            original.len_of(Axis(0))
        )));
    }

    let mut out = original.to_owned();
    for (t, _) in update.iter().enumerate().filter(|(_, u)| **u) {
        out.index_axis_mut(Axis(0), t)
            .assign(&refined.index_axis(Axis(0), t));
    }
    Ok(out)
}

/// Geman-McClure robust penalty on a single residual.
#[inline]
fn gmof(x: f32, sigma: f32) -> f32 {
    let x2 = x * x;
    let s2 = sigma * sigma;
    s2 * x2 / (s2 + x2)
}

#[derive(Debug, Clone)]
pub struct TemporalRefiner {
    config: RefineConfig,
    /// Converts crop-normalized residuals into crop pixels
    pixel_scale: f32,
}

impl TemporalRefiner {
    pub fn new(config: RefineConfig, crop_size: usize) -> Result<Self> {
        config.validate()?;
        if crop_size == 0 {
            return Err(Error::InvalidConfig("crop_size must be at least 1".into()));
        }
        Ok(Self {
            config,
            pixel_scale: crop_size as f32 / 2.0,
        })
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// Robust reprojection loss of one frame.
    ///
    /// `joints3d` is (joints, 3), `keypoints` is (joints, 3) with confidence.
    pub fn reprojection_loss(
        &self,
        joints3d: ArrayView2<f32>,
        camera: &CropCamera,
        keypoints: ArrayView2<f32>,
    ) -> f32 {
        let mut loss = 0.0;
        for (joint, kp) in joints3d.rows().into_iter().zip(keypoints.rows()) {
            let conf = kp[2];
            if conf <= self.config.confidence_threshold {
                continue;
            }
            let (u, v) = camera.project(joint[0], joint[1]);
            let rx = (u - kp[0]) * self.pixel_scale;
            let ry = (v - kp[1]) * self.pixel_scale;
            loss += conf * conf * (gmof(rx, self.config.sigma) + gmof(ry, self.config.sigma));
        }
        loss
    }

    /// Refine a whole sequence. The caller decides what to keep via [`merge_rows`].
    pub fn refine<M: BodyModel>(&self, model: &M, input: RefineInput<'_>) -> Result<RefinementOutcome> {
        let frames = input.pose.len_of(Axis(0));
        for (name, len) in [
            ("shape", input.shape.len_of(Axis(0))),
            ("camera", input.camera.len_of(Axis(0))),
            ("keypoints", input.keypoints.len_of(Axis(0))),
        ] {
            if len != frames {
                return Err(Error::ShapeMismatch(format!(
                    "{len} {name} frames for {frames} pose frames"
                )));
            }
        }
        if input.camera.len_of(Axis(1)) != 3 {
            return Err(Error::ShapeMismatch("crop cameras must have 3 values".into()));
        }

        let pose_dim = input.pose.len_of(Axis(1));
        let shape_dim = input.shape.len_of(Axis(1));

        // Parameter vector per frame: pose | shape | camera
        let mut params: Vec<Array1<f32>> = (0..frames)
            .map(|t| {
                ndarray::concatenate(
                    Axis(0),
                    &[input.pose.row(t), input.shape.row(t), input.camera.row(t)],
                )
            })
            .collect::<Result<_, _>>()?;

        let problem = Problem {
            refiner: self,
            model,
            keypoints: input.keypoints,
            init_pose: input.pose,
            pose_dim,
            shape_dim,
        };

        let mut original_loss = Array1::zeros(frames);
        for (t, p) in params.iter().enumerate() {
            original_loss[t] = problem.data_term(t, p.view())?;
        }

        for (t, p) in params.iter_mut().enumerate() {
            if let Some(fitted) = problem.fit_camera(t, p.view())? {
                *p = fitted;
            }
        }

        let mut step = vec![self.config.learning_rate; frames];
        for _ in 0..self.config.iterations {
            let mut improved = false;
            for t in 0..frames {
                let prev = t.checked_sub(1).map(|i| params[i].clone());
                let next = params.get(t + 1).cloned();
                let neighbors = (prev.as_ref(), next.as_ref());
                let (candidate, new_step) =
                    problem.descend(t, params[t].view(), neighbors, step[t])?;
                step[t] = new_step;
                if let Some(candidate) = candidate {
                    params[t] = candidate;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }

        let mut pose = Array2::zeros((frames, pose_dim));
        let mut shape = Array2::zeros((frames, shape_dim));
        let mut camera = Array2::zeros((frames, 3));
        for (t, p) in params.iter().enumerate() {
            let (ps, bs, cs) = problem.split(p.view());
            pose.row_mut(t).assign(&ps);
            shape.row_mut(t).assign(&bs);
            camera.row_mut(t).assign(&cs);
        }

        let (vertices, joints3d) = forward_sequence(model, pose.view(), shape.view())?;
        let joints2d = project_joints(joints3d.view(), camera.view())?;

        let mut refined_loss = Array1::zeros(frames);
        for t in 0..frames {
            refined_loss[t] = self.reprojection_loss(
                joints3d.index_axis(Axis(0), t),
                &CropCamera::from_row(camera.row(t)),
                input.keypoints.index_axis(Axis(0), t),
            );
        }

        let update = original_loss
            .iter()
            .zip(refined_loss.iter())
            .map(|(orig, new)| new < orig)
            .collect();

        Ok(RefinementOutcome {
            refined: RefinedSequence {
                pose,
                shape,
                camera,
                vertices,
                joints3d,
                joints2d,
            },
            update,
            original_loss,
            refined_loss,
        })
    }
}

/// Everything the per-frame objective needs, borrowed for one `refine` call.
struct Problem<'r, 'v, M> {
    refiner: &'r TemporalRefiner,
    model: &'r M,
    keypoints: ArrayView3<'v, f32>,
    init_pose: ArrayView2<'v, f32>,
    pose_dim: usize,
    shape_dim: usize,
}

impl<M: BodyModel> Problem<'_, '_, M> {
    fn split<'p>(
        &self,
        params: ArrayView1<'p, f32>,
    ) -> (ArrayView1<'p, f32>, ArrayView1<'p, f32>, ArrayView1<'p, f32>) {
        let (pose, rest) = params.split_at(Axis(0), self.pose_dim);
        let (shape, cam) = rest.split_at(Axis(0), self.shape_dim);
        (pose, shape, cam)
    }

    fn joints(&self, params: ArrayView1<f32>) -> Result<Array2<f32>> {
        let (pose, shape, _) = self.split(params);
        let joints = self
            .model
            .joints(pose, shape)
            .map_err(|e| Error::BodyModel(Box::new(e)))?;
        if joints.len_of(Axis(0)) != self.keypoints.len_of(Axis(1)) {
            return Err(Error::ShapeMismatch(format!(
                "body model gives {} joints but {} keypoints were observed",
                joints.len_of(Axis(0)),
                self.keypoints.len_of(Axis(1))
            )));
        }
        Ok(joints)
    }

    /// Reprojection loss of frame `t` under `params`.
    fn data_term(&self, t: usize, params: ArrayView1<f32>) -> Result<f32> {
        let joints = self.joints(params)?;
        let (_, _, cam) = self.split(params);
        Ok(self.refiner.reprojection_loss(
            joints.view(),
            &CropCamera::from_row(cam),
            self.keypoints.index_axis(Axis(0), t),
        ))
    }

    /// Every term of the objective that depends on frame `t`.
    fn local_objective(
        &self,
        t: usize,
        params: ArrayView1<f32>,
        neighbors: (Option<&Array1<f32>>, Option<&Array1<f32>>),
    ) -> Result<f32> {
        let config = &self.refiner.config;
        let (pose, shape, _) = self.split(params);

        let pose_prior: f32 = pose
            .iter()
            .zip(self.init_pose.row(t))
            .map(|(p, p0)| (p - p0).powi(2))
            .sum();
        let shape_prior: f32 = shape.iter().map(|b| b * b).sum();

        let mut smoothness = 0.0;
        for neighbor in [neighbors.0, neighbors.1].into_iter().flatten() {
            let (other, _, _) = self.split(neighbor.view());
            smoothness += pose
                .iter()
                .zip(other)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>();
        }

        Ok(self.data_term(t, params)?
            + config.pose_prior_weight * pose_prior
            + config.shape_prior_weight * shape_prior
            + config.smoothness_weight * smoothness)
    }

    /// Closed-form weighted least-squares weak-perspective camera for frame `t`.
    ///
    /// Solves `u = a*X + b`, `v = a*Y + c` for `(a, b, c)`, then
    /// `s = a`, `tx = b / a`, `ty = c / a`. Kept only if it lowers the frame's loss.
    fn fit_camera(&self, t: usize, params: ArrayView1<f32>) -> Result<Option<Array1<f32>>> {
        let joints = self.joints(params)?;
        let keypoints = self.keypoints.index_axis(Axis(0), t);
        let threshold = self.refiner.config.confidence_threshold;

        let mut ata = Matrix3::<f64>::zeros();
        let mut atb = Vector3::<f64>::zeros();
        let mut used = 0;
        for (joint, kp) in joints.rows().into_iter().zip(keypoints.rows()) {
            if kp[2] <= threshold {
                continue;
            }
            let w = f64::from(kp[2]).powi(2);
            let rx = Vector3::new(f64::from(joint[0]), 1.0, 0.0);
            let ry = Vector3::new(f64::from(joint[1]), 0.0, 1.0);
            ata += w * (rx * rx.transpose() + ry * ry.transpose());
            atb += w * (rx * f64::from(kp[0]) + ry * f64::from(kp[1]));
            used += 1;
        }
        if used < 2 {
            return Ok(None);
        }

        let Some(solution) = ata.lu().solve(&atb) else {
            return Ok(None);
        };
        let (a, b, c) = (solution[0], solution[1], solution[2]);
        if !(a.is_finite() && a > 1e-6 && b.is_finite() && c.is_finite()) {
            return Ok(None);
        }

        let mut candidate = params.to_owned();
        let n = candidate.len();
        candidate[n - 3] = a as f32;
        candidate[n - 2] = (b / a) as f32;
        candidate[n - 1] = (c / a) as f32;

        if self.data_term(t, candidate.view())? < self.data_term(t, params)? {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }

    /// One normalized-gradient step with backtracking on frame `t`.
    ///
    /// Returns the improved parameters (if any) and the step size to use next time.
    fn descend(
        &self,
        t: usize,
        params: ArrayView1<f32>,
        neighbors: (Option<&Array1<f32>>, Option<&Array1<f32>>),
        step: f32,
    ) -> Result<(Option<Array1<f32>>, f32)> {
        let h = self.refiner.config.gradient_step;
        let base = self.local_objective(t, params, neighbors)?;

        let mut grad = Array1::zeros(params.len());
        let mut nudged = params.to_owned();
        for i in 0..params.len() {
            let orig = nudged[i];
            nudged[i] = orig + h;
            grad[i] = (self.local_objective(t, nudged.view(), neighbors)? - base) / h;
            nudged[i] = orig;
        }

        let norm = grad.dot(&grad).sqrt();
        if !(norm.is_finite() && norm > 0.0) {
            return Ok((None, step));
        }
        let direction = grad / norm;

        let mut alpha = step;
        for _ in 0..8 {
            let candidate = &params - &(&direction * alpha);
            let cam_scale = candidate[candidate.len() - 3];
            if cam_scale > 0.0 && self.local_objective(t, candidate.view(), neighbors)? < base {
                return Ok((Some(candidate), (alpha * 2.0).min(self.refiner.config.learning_rate * 8.0)));
            }
            alpha /= 2.0;
        }
        Ok((None, alpha))
    }
}
