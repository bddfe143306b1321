//! Crop-local camera and keypoints back to original-image coordinates.
//!
//! Both transforms invert the crop construction in [`crate::motion::crop`]
//! through the same [`CropGeometry`], so they are exact coordinate changes.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, aview1};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::motion::bbox::CropGeometry;

/// Weak-perspective camera predicted inside the crop: `p = s * (X + t)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropCamera {
    pub s: f32,
    pub tx: f32,
    pub ty: f32,
}

impl CropCamera {
    pub fn from_row(row: ArrayView1<f32>) -> Self {
        Self {
            s: row[0],
            tx: row[1],
            ty: row[2],
        }
    }

    /// Project a 3D point into crop-normalized coordinates.
    #[inline]
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        (self.s * (x + self.tx), self.s * (y + self.ty))
    }
}

/// Weak-perspective camera in original-image normalized device coordinates.
///
/// Separate x and y scales keep the mapping exact on non-square images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrigCamera {
    pub sx: f32,
    pub sy: f32,
    pub tx: f32,
    pub ty: f32,
}

impl OrigCamera {
    pub fn from_row(row: ArrayView1<f32>) -> Self {
        Self {
            sx: row[0],
            sy: row[1],
            tx: row[2],
            ty: row[3],
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.sx, self.sy, self.tx, self.ty]
    }

    /// Project a 3D point to original-image pixels for an image of `width` x `height`.
    pub fn project_to_pixels(&self, x: f32, y: f32, width: u32, height: u32) -> (f32, f32) {
        let ndc_x = self.sx * (x + self.tx);
        let ndc_y = self.sy * (y + self.ty);
        (
            (ndc_x + 1.0) * width as f32 / 2.0,
            (ndc_y + 1.0) * height as f32 / 2.0,
        )
    }
}

pub fn crop_cam_to_orig(
    cam: &CropCamera,
    geom: &CropGeometry,
    img_width: u32,
    img_height: u32,
) -> Result<OrigCamera> {
    if img_width == 0 || img_height == 0 {
        return Err(Error::InvalidConfig(format!(
            "image size {img_width}x{img_height}"
        )));
    }
    if !(cam.s.is_finite() && cam.s != 0.0) {
        return Err(Error::ShapeMismatch(format!(
            "camera scale {} cannot be remapped",
            cam.s
        )));
    }
    let hw = img_width as f32 / 2.0;
    let hh = img_height as f32 / 2.0;
    let sx = cam.s * geom.side / img_width as f32;
    let sy = cam.s * geom.side / img_height as f32;
    Ok(OrigCamera {
        sx,
        sy,
        tx: cam.tx + (geom.cx - hw) / hw / sx,
        ty: cam.ty + (geom.cy - hh) / hh / sy,
    })
}

/// Remap a (frames, 3) crop camera sequence into a (frames, 4) original camera sequence.
pub fn remap_cameras(
    cams: ArrayView2<f32>,
    geometry: &[CropGeometry],
    img_width: u32,
    img_height: u32,
) -> Result<Array2<f32>> {
    check_frames(cams.len_of(Axis(0)), geometry.len())?;
    let mut out = Array2::zeros((geometry.len(), 4));
    for ((row, geom), mut dst) in cams.outer_iter().zip(geometry).zip(out.outer_iter_mut()) {
        let orig = crop_cam_to_orig(&CropCamera::from_row(row), geom, img_width, img_height)?;
        dst.assign(&aview1(&orig.to_array()));
    }
    Ok(out)
}

/// Map (frames, joints, 2+) crop-normalized keypoints to (frames, joints, 2) image pixels.
pub fn crop_keypoints_to_orig(
    keypoints: ArrayView3<f32>,
    geometry: &[CropGeometry],
) -> Result<Array3<f32>> {
    check_frames(keypoints.len_of(Axis(0)), geometry.len())?;
    let (frames, joints, _) = keypoints.dim();
    let mut out = Array3::zeros((frames, joints, 2));
    for ((frame, geom), mut dst) in keypoints
        .outer_iter()
        .zip(geometry)
        .zip(out.outer_iter_mut())
    {
        for (kp, mut px) in frame.rows().into_iter().zip(dst.rows_mut()) {
            let (x, y) = geom.denormalize(kp[0], kp[1]);
            px[0] = x;
            px[1] = y;
        }
    }
    Ok(out)
}

/// Project (frames, joints, 3) points with per-frame crop cameras into (frames, joints, 2)
/// crop-normalized coordinates.
pub fn project_joints(joints3d: ArrayView3<f32>, cams: ArrayView2<f32>) -> Result<Array3<f32>> {
    check_frames(cams.len_of(Axis(0)), joints3d.len_of(Axis(0)))?;
    let (frames, joints, _) = joints3d.dim();
    let mut out = Array3::zeros((frames, joints, 2));
    for ((frame, cam), mut dst) in joints3d
        .outer_iter()
        .zip(cams.outer_iter())
        .zip(out.outer_iter_mut())
    {
        let cam = CropCamera::from_row(cam);
        for (p, mut uv) in frame.rows().into_iter().zip(dst.rows_mut()) {
            let (u, v) = cam.project(p[0], p[1]);
            uv[0] = u;
            uv[1] = v;
        }
    }
    Ok(out)
}

fn check_frames(got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::ShapeMismatch(format!(
            "{got} frames of predictions for {expected} crop windows"
        )));
    }
    Ok(())
}
