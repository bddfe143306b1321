use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bounding box of a tracked subject in original-image pixels.
///
/// Stored in center format (center x, center y, width, height), which is what
/// the tracker hands over and what the crop geometry is derived from.
/// Conversions from the other common layouts are provided:
/// - TLBR: Top-Left X, Top-Left Y, Bottom-Right X, Bottom-Right Y
/// - TLWH: Top-Left X, Top-Left Y, Width, Height
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// Center x coordinate
    pub cx: f32,
    /// Center y coordinate
    pub cy: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

impl BBox {
    /// Create a new box from center coordinates and dimensions.
    #[inline]
    pub fn new(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            cx,
            cy,
            width,
            height,
        }
    }

    /// Create a box from TLBR format (top-left x, top-left y, bottom-right x, bottom-right y).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new((x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1)
    }

    /// Create a box from TLWH format (top-left x, top-left y, width, height).
    #[inline]
    pub fn from_tlwh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x + width / 2.0, y + height / 2.0, width, height)
    }

    /// Convert to TLBR format: (x1, y1, x2, y2).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [
            self.cx - self.width / 2.0,
            self.cy - self.height / 2.0,
            self.cx + self.width / 2.0,
            self.cy + self.height / 2.0,
        ]
    }

    /// Convert to center format: (cx, cy, width, height).
    #[inline]
    pub fn to_xywh(&self) -> [f32; 4] {
        [self.cx, self.cy, self.width, self.height]
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// A box is usable for cropping only if both sides are finite and positive.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        !(self.cx.is_finite()
            && self.cy.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0)
    }

    /// Estimate a box from one frame of keypoints laid out as rows of `(x, y, confidence)`.
    ///
    /// Only keypoints with confidence above `vis_thresh` are used; the tight
    /// box around them is grown by `expand` around its center. Returns `None`
    /// when fewer than two keypoints are visible.
    pub fn from_keypoints(keypoints: ArrayView2<f32>, vis_thresh: f32, expand: f32) -> Option<Self> {
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        let mut count = 0u32;

        for kp in keypoints.rows() {
            if kp.len() < 3 || kp[2] <= vis_thresh {
                continue;
            }
            min_x = min_x.min(kp[0]);
            min_y = min_y.min(kp[1]);
            max_x = max_x.max(kp[0]);
            max_y = max_y.max(kp[1]);
            count += 1;
        }

        if count < 2 {
            return None;
        }

        Some(Self::new(
            (min_x + max_x) / 2.0,
            (min_y + max_y) / 2.0,
            (max_x - min_x) * expand,
            (max_y - min_y) * expand,
        ))
    }
}

/// Square crop window around a box, shared by the crop sampler and the remapper.
///
/// The crop covers `max(width, height) * scale` pixels on each side, centered
/// on the box. Crop-normalized coordinates run from -1 to 1 across that side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropGeometry {
    pub cx: f32,
    pub cy: f32,
    /// Side length of the square crop in original-image pixels
    pub side: f32,
}

impl CropGeometry {
    pub fn from_bbox(bbox: &BBox, scale: f32) -> Result<Self> {
        if bbox.is_degenerate() {
            return Err(Error::DegenerateBox {
                width: bbox.width,
                height: bbox.height,
            });
        }
        let side = bbox.width.max(bbox.height) * scale;
        if !(side.is_finite() && side > 0.0) {
            return Err(Error::DegenerateBox {
                width: bbox.width,
                height: bbox.height,
            });
        }
        Ok(Self {
            cx: bbox.cx,
            cy: bbox.cy,
            side,
        })
    }

    #[inline]
    pub fn half_side(&self) -> f32 {
        self.side / 2.0
    }

    /// Original-image pixel to crop-normalized coordinates.
    #[inline]
    pub fn normalize(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.half_side();
        ((x - self.cx) / half, (y - self.cy) / half)
    }

    /// Crop-normalized coordinates back to original-image pixels.
    #[inline]
    pub fn denormalize(&self, u: f32, v: f32) -> (f32, f32) {
        let half = self.half_side();
        (self.cx + u * half, self.cy + v * half)
    }
}
