//! Per-subject reconstruction result and its on-disk form.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::motion::bbox::BBox;
use crate::motion::remap::OrigCamera;
use crate::motion::track::SubjectId;

/// Reconstructed sequence of one subject; every array is indexed by position in `frame_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PersonResultRecord", into = "PersonResultRecord")]
pub struct PersonResult {
    pred_cam: Array2<f32>,
    orig_cam: Array2<f32>,
    verts: Array3<f32>,
    pose: Array2<f32>,
    betas: Array2<f32>,
    joints3d: Array3<f32>,
    joints2d: Option<Array3<f32>>,
    joints2d_img_coord: Array3<f32>,
    bboxes: Vec<BBox>,
    frame_ids: Vec<usize>,
}

/// Unvalidated field set; also the serialized layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonResultRecord {
    /// (frames, 3) crop cameras
    pub pred_cam: Array2<f32>,
    /// (frames, 4) original-image cameras
    pub orig_cam: Array2<f32>,
    /// (frames, vertices, 3)
    pub verts: Array3<f32>,
    pub pose: Array2<f32>,
    pub betas: Array2<f32>,
    /// (frames, joints, 3)
    pub joints3d: Array3<f32>,
    /// Observed keypoints in image pixels, when the track carried them
    pub joints2d: Option<Array3<f32>>,
    /// (frames, joints, 2) predicted keypoints in image pixels
    pub joints2d_img_coord: Array3<f32>,
    pub bboxes: Vec<BBox>,
    pub frame_ids: Vec<usize>,
}

impl TryFrom<PersonResultRecord> for PersonResult {
    type Error = Error;

    fn try_from(r: PersonResultRecord) -> Result<Self> {
        let n = r.frame_ids.len();
        let lens = [
            ("pred_cam", r.pred_cam.len_of(Axis(0))),
            ("orig_cam", r.orig_cam.len_of(Axis(0))),
            ("verts", r.verts.len_of(Axis(0))),
            ("pose", r.pose.len_of(Axis(0))),
            ("betas", r.betas.len_of(Axis(0))),
            ("joints3d", r.joints3d.len_of(Axis(0))),
            ("joints2d_img_coord", r.joints2d_img_coord.len_of(Axis(0))),
            ("bboxes", r.bboxes.len()),
        ];
        for (name, len) in lens {
            if len != n {
                return Err(Error::ShapeMismatch(format!(
                    "{name} has {len} frames, expected {n}"
                )));
            }
        }
        if let Some(j2d) = &r.joints2d {
            if j2d.len_of(Axis(0)) != n {
                return Err(Error::ShapeMismatch(format!(
                    "joints2d has {} frames, expected {n}",
                    j2d.len_of(Axis(0))
                )));
            }
        }
        if r.pred_cam.len_of(Axis(1)) != 3 || r.orig_cam.len_of(Axis(1)) != 4 {
            return Err(Error::ShapeMismatch(format!(
                "cameras must be (frames, 3) and (frames, 4), got {:?} and {:?}",
                r.pred_cam.dim(),
                r.orig_cam.dim()
            )));
        }

        Ok(Self {
            pred_cam: r.pred_cam,
            orig_cam: r.orig_cam,
            verts: r.verts,
            pose: r.pose,
            betas: r.betas,
            joints3d: r.joints3d,
            joints2d: r.joints2d,
            joints2d_img_coord: r.joints2d_img_coord,
            bboxes: r.bboxes,
            frame_ids: r.frame_ids,
        })
    }
}

impl From<PersonResult> for PersonResultRecord {
    fn from(p: PersonResult) -> Self {
        Self {
            pred_cam: p.pred_cam,
            orig_cam: p.orig_cam,
            verts: p.verts,
            pose: p.pose,
            betas: p.betas,
            joints3d: p.joints3d,
            joints2d: p.joints2d,
            joints2d_img_coord: p.joints2d_img_coord,
            bboxes: p.bboxes,
            frame_ids: p.frame_ids,
        }
    }
}

impl PersonResult {
    pub fn pred_cam(&self) -> ArrayView2<f32> {
        self.pred_cam.view()
    }

    pub fn orig_cam(&self) -> ArrayView2<f32> {
        self.orig_cam.view()
    }

    pub fn verts(&self) -> &Array3<f32> {
        &self.verts
    }

    pub fn pose(&self) -> ArrayView2<f32> {
        self.pose.view()
    }

    pub fn betas(&self) -> ArrayView2<f32> {
        self.betas.view()
    }

    pub fn joints3d(&self) -> &Array3<f32> {
        &self.joints3d
    }

    pub fn joints2d(&self) -> Option<&Array3<f32>> {
        self.joints2d.as_ref()
    }

    pub fn joints2d_img_coord(&self) -> &Array3<f32> {
        &self.joints2d_img_coord
    }

    pub fn bboxes(&self) -> &[BBox] {
        &self.bboxes
    }

    pub fn frame_ids(&self) -> &[usize] {
        &self.frame_ids
    }

    pub fn len(&self) -> usize {
        self.frame_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_ids.is_empty()
    }

    /// Position of `frame` in this result, if the subject was tracked through it.
    pub fn position_of(&self, frame: usize) -> Option<usize> {
        self.frame_ids.binary_search(&frame).ok()
    }

    pub fn orig_camera_at(&self, position: usize) -> OrigCamera {
        OrigCamera::from_row(self.orig_cam.row(position))
    }
}

/// Write all results as one JSON object keyed by subject id.
pub fn save_results<P: AsRef<Path>>(path: P, results: &BTreeMap<SubjectId, PersonResult>) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, results)?;
    Ok(())
}

pub fn load_results<P: AsRef<Path>>(path: P) -> Result<BTreeMap<SubjectId, PersonResult>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
