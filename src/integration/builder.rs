//! Builder for creating Track objects from per-frame boxes in various formats.

use ndarray::Array3;

use crate::error::Result;
use crate::motion::{BBox, SubjectId, Track};

/// Builder for creating a [`Track`] one frame at a time.
#[derive(Debug, Clone, Default)]
pub struct TrackBuilder {
    subject_id: SubjectId,
    frames: Vec<usize>,
    bboxes: Vec<BBox>,
    joints2d: Option<Array3<f32>>,
}

impl TrackBuilder {
    /// Create a new track builder for the given subject.
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            subject_id,
            ..Default::default()
        }
    }

    /// Add a frame with a bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(self, frame: usize, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox(frame, BBox::from_tlbr(x1, y1, x2, y2))
    }

    /// Add a frame with a bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(self, frame: usize, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox(frame, BBox::new(cx, cy, w, h))
    }

    /// Add a frame with a bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(self, frame: usize, x: f32, y: f32, w: f32, h: f32) -> Self {
        self.bbox(frame, BBox::from_tlwh(x, y, w, h))
    }

    /// Add a frame with an already-built box.
    pub fn bbox(mut self, frame: usize, bbox: BBox) -> Self {
        self.frames.push(frame);
        self.bboxes.push(bbox);
        self
    }

    /// Attach keypoints for the whole track, shape (frames, joints, 3).
    pub fn keypoints(mut self, joints2d: Array3<f32>) -> Self {
        self.joints2d = Some(joints2d);
        self
    }

    /// Build the final `Track`, validating frame order and lengths.
    pub fn build(self) -> Result<Track> {
        Track::new(self.subject_id, self.frames, self.bboxes, self.joints2d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_track_builder() {
        let track = TrackBuilder::new(3)
            .tlbr(0, 10.0, 20.0, 50.0, 80.0)
            .xywh(1, 30.0, 50.0, 40.0, 60.0)
            .tlwh(2, 10.0, 20.0, 40.0, 60.0)
            .build()
            .unwrap();

        assert_eq!(track.subject_id(), 3);
        assert_eq!(track.frame_indices(), &[0, 1, 2]);
        for bbox in track.bboxes() {
            assert_eq!(bbox.to_xywh(), [30.0, 50.0, 40.0, 60.0]);
        }
        assert!(!track.has_keypoints());
    }

    #[test]
    fn test_builder_validates() {
        let err = TrackBuilder::new(1)
            .xywh(4, 1.0, 1.0, 2.0, 2.0)
            .xywh(4, 1.0, 1.0, 2.0, 2.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnorderedFrames { subject_id: 1, .. }));

        let err = TrackBuilder::new(2)
            .xywh(0, 1.0, 1.0, 2.0, 2.0)
            .keypoints(Array3::zeros((2, 17, 3)))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::TrackLengthMismatch { .. }));
    }
}
