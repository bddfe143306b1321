//! Tracklets handed over by the tracker, and the minimum-length filter.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::motion::bbox::BBox;

/// Identifier the tracker assigned to a subject.
pub type SubjectId = u64;

/// Tracks shorter than this are dropped before reconstruction.
pub const MIN_NUM_FRAMES: usize = 25;

/// Keypoints with confidence at or below this are ignored when deriving boxes.
const KEYPOINT_VIS_THRESH: f32 = 0.3;

/// Growth applied to the tight keypoint box when no tracker box is available.
const KEYPOINT_BOX_EXPAND: f32 = 1.2;

/// Observations of one subject across the video.
#[derive(Debug, Clone)]
pub struct Track {
    subject_id: SubjectId,
    frame_indices: Vec<usize>,
    bboxes: Vec<BBox>,
    /// Per-frame keypoints, shape (frames, joints, 3) with rows of (x, y, confidence)
    joints2d: Option<Array3<f32>>,
}

impl Track {
    /// Build a track, checking that every per-frame sequence has the same length
    /// and that frame indices strictly increase.
    pub fn new(
        subject_id: SubjectId,
        frame_indices: Vec<usize>,
        bboxes: Vec<BBox>,
        joints2d: Option<Array3<f32>>,
    ) -> Result<Self> {
        let frames = frame_indices.len();
        let joints_len = joints2d.as_ref().map(|j| j.len_of(Axis(0)));
        if bboxes.len() != frames || joints_len.is_some_and(|n| n != frames) {
            return Err(Error::TrackLengthMismatch {
                subject_id,
                frames,
                bboxes: bboxes.len(),
                joints2d: joints_len,
            });
        }
        if let Some(position) = frame_indices.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Error::UnorderedFrames {
                subject_id,
                position: position + 1,
            });
        }
        if let Some(j2d) = &joints2d {
            if j2d.len_of(Axis(2)) != 3 {
                return Err(Error::ShapeMismatch(format!(
                    "subject {subject_id}: keypoints need (x, y, confidence), got {} values",
                    j2d.len_of(Axis(2))
                )));
            }
        }

        Ok(Self {
            subject_id,
            frame_indices,
            bboxes,
            joints2d,
        })
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn frame_indices(&self) -> &[usize] {
        &self.frame_indices
    }

    pub fn bboxes(&self) -> &[BBox] {
        &self.bboxes
    }

    pub fn joints2d(&self) -> Option<&Array3<f32>> {
        self.joints2d.as_ref()
    }

    pub fn has_keypoints(&self) -> bool {
        self.joints2d.is_some()
    }

    pub fn len(&self) -> usize {
        self.frame_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_indices.is_empty()
    }
}

/// Tracker output for one subject as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackInput {
    pub frames: Vec<usize>,
    /// Boxes in (cx, cy, w, h) format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<[f32; 4]>>,
    /// Keypoints per frame, each a list of (x, y, confidence)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joints2d: Option<Vec<Vec<[f32; 3]>>>,
}

impl TrackInput {
    /// Convert into a validated [`Track`].
    ///
    /// When only keypoints are present, boxes are derived from the visible
    /// keypoints of each frame. Leading and trailing frames without enough
    /// visible keypoints are trimmed; gaps in the middle reuse the previous box.
    pub fn into_track(self, subject_id: SubjectId) -> Result<Track> {
        let joints2d = match self.joints2d {
            Some(sets) => Some(keypoints_to_array(subject_id, &sets)?),
            None => None,
        };

        match (self.bbox, joints2d) {
            (Some(boxes), joints2d) => {
                let bboxes = boxes
                    .iter()
                    .map(|b| BBox::new(b[0], b[1], b[2], b[3]))
                    .collect();
                Track::new(subject_id, self.frames, bboxes, joints2d)
            }
            (None, Some(joints2d)) => {
                track_from_keypoints(subject_id, self.frames, joints2d)
            }
            (None, None) => Err(Error::MissingBoxes { subject_id }),
        }
    }
}

fn keypoints_to_array(subject_id: SubjectId, sets: &[Vec<[f32; 3]>]) -> Result<Array3<f32>> {
    let joints = sets.first().map_or(0, Vec::len);
    if let Some(bad) = sets.iter().find(|s| s.len() != joints) {
        return Err(Error::ShapeMismatch(format!(
            "subject {subject_id}: keypoint sets of {} and {} joints",
            joints,
            bad.len()
        )));
    }
    let flat: Vec<f32> = sets.iter().flatten().flatten().copied().collect();
    Ok(Array3::from_shape_vec((sets.len(), joints, 3), flat)?)
}

fn track_from_keypoints(
    subject_id: SubjectId,
    frames: Vec<usize>,
    joints2d: Array3<f32>,
) -> Result<Track> {
    if frames.len() != joints2d.len_of(Axis(0)) {
        return Err(Error::TrackLengthMismatch {
            subject_id,
            frames: frames.len(),
            bboxes: 0,
            joints2d: Some(joints2d.len_of(Axis(0))),
        });
    }

    let boxes: Vec<Option<BBox>> = joints2d
        .outer_iter()
        .map(|kps| BBox::from_keypoints(kps, KEYPOINT_VIS_THRESH, KEYPOINT_BOX_EXPAND))
        .collect();

    let (Some(first), Some(last)) = (
        boxes.iter().position(Option::is_some),
        boxes.iter().rposition(Option::is_some),
    ) else {
        // Nothing visible at all: an empty track, which the length filter drops.
        return Track::new(subject_id, Vec::new(), Vec::new(), None);
    };

    let mut bboxes = Vec::with_capacity(last - first + 1);
    let mut prev = BBox::default();
    for bbox in &boxes[first..=last] {
        prev = bbox.unwrap_or(prev);
        bboxes.push(prev);
    }

    Track::new(
        subject_id,
        frames[first..=last].to_vec(),
        bboxes,
        Some(joints2d.slice(ndarray::s![first..=last, .., ..]).to_owned()),
    )
}

/// Read the tracker output map `{subject_id: {frames, bbox?, joints2d?}}` from JSON.
pub fn load_tracks<P: AsRef<Path>>(path: P) -> Result<Vec<Track>> {
    let content = std::fs::read_to_string(path)?;
    let inputs: BTreeMap<SubjectId, TrackInput> = serde_json::from_str(&content)?;
    inputs
        .into_iter()
        .map(|(id, input)| input.into_track(id))
        .collect()
}

/// Split tracks into those long enough to reconstruct and the ids of those dropped.
pub fn filter_tracks(tracks: Vec<Track>, min_len: usize) -> (Vec<Track>, Vec<SubjectId>) {
    let mut kept = Vec::with_capacity(tracks.len());
    let mut dropped = Vec::new();
    for track in tracks {
        if track.len() < min_len {
            tracing::debug!(
                subject_id = track.subject_id,
                frames = track.len(),
                min_len,
                "dropping short track"
            );
            dropped.push(track.subject_id);
        } else {
            kept.push(track);
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_of_len(id: SubjectId, len: usize) -> Track {
        Track::new(
            id,
            (0..len).collect(),
            vec![BBox::new(100.0, 100.0, 50.0, 80.0); len],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_filter_threshold_boundary() {
        let tracks = vec![track_of_len(1, 24), track_of_len(2, 25)];
        let (kept, dropped) = filter_tracks(tracks, MIN_NUM_FRAMES);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].subject_id(), 2);
        assert_eq!(dropped, vec![1]);
    }

    #[test]
    fn test_length_mismatch_is_fatal() {
        let err = Track::new(7, vec![0, 1, 2], vec![BBox::default(); 2], None).unwrap_err();
        assert!(matches!(err, Error::TrackLengthMismatch { subject_id: 7, .. }));

        let err = Track::new(
            7,
            vec![0, 1],
            vec![BBox::default(); 2],
            Some(Array3::zeros((3, 4, 3))),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::TrackLengthMismatch {
                joints2d: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_unordered_frames_rejected() {
        let err = Track::new(3, vec![0, 2, 2], vec![BBox::default(); 3], None).unwrap_err();
        assert!(matches!(err, Error::UnorderedFrames { position: 2, .. }));
    }

    #[test]
    fn test_input_requires_boxes_or_keypoints() {
        let input = TrackInput {
            frames: vec![0, 1],
            ..Default::default()
        };
        assert!(matches!(
            input.into_track(9),
            Err(Error::MissingBoxes { subject_id: 9 })
        ));
    }

    #[test]
    fn test_input_from_keypoints_trims_invisible_ends() {
        let visible = vec![[10.0, 10.0, 0.9], [30.0, 50.0, 0.9]];
        let hidden = vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let input = TrackInput {
            frames: vec![4, 5, 6, 7, 8],
            bbox: None,
            joints2d: Some(vec![
                hidden.clone(),
                visible.clone(),
                hidden.clone(),
                visible,
                hidden,
            ]),
        };
        let track = input.into_track(1).unwrap();
        assert_eq!(track.frame_indices(), &[5, 6, 7]);
        assert_eq!(track.bboxes().len(), 3);
        // interior gap holds the previous box
        assert_eq!(track.bboxes()[1], track.bboxes()[0]);
        assert_eq!(track.joints2d().unwrap().dim(), (3, 2, 3));
    }

    #[test]
    fn test_input_json_roundtrip_shape() {
        let json = r#"{"3": {"frames": [0, 1], "bbox": [[1, 2, 3, 4], [5, 6, 7, 8]]}}"#;
        let inputs: BTreeMap<SubjectId, TrackInput> = serde_json::from_str(json).unwrap();
        let track = inputs[&3].clone().into_track(3).unwrap();
        assert_eq!(track.bboxes()[1], BBox::new(5.0, 6.0, 7.0, 8.0));
        assert!(!track.has_keypoints());
    }

    #[test]
    fn test_load_tracks_from_file() {
        let path = std::env::temp_dir().join(format!("bodytrack-tracks-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"1": {"frames": [0], "bbox": [[5, 5, 2, 2]]}, "2": {"frames": [3, 4]}}"#,
        )
        .unwrap();
        let result = load_tracks(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::MissingBoxes { subject_id: 2 })));
    }
}
