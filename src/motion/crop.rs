//! Fixed-size square crops around each tracked box.

use ndarray::{Array3, Array4, ArrayView3, Axis};

use crate::error::{Error, Result};
use crate::motion::bbox::CropGeometry;
use crate::motion::track::Track;

/// Per-channel mean used when crops are normalized (RGB, 0..1 input).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation used when crops are normalized.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Crops for one track, in track order.
#[derive(Debug, Clone)]
pub struct CropBatch {
    /// Shape (frames, crop_size, crop_size, 3)
    pub crops: Array4<f32>,
    /// Crop-normalized keypoints, shape (frames, joints, 3), when the track has them
    pub keypoints: Option<Array3<f32>>,
    /// Crop window of each frame, reused by the remapper
    pub geometry: Vec<CropGeometry>,
}

impl CropBatch {
    pub fn len(&self) -> usize {
        self.crops.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct CropSampler {
    crop_size: usize,
    scale: f32,
    normalize: bool,
}

impl CropSampler {
    pub fn new(crop_size: usize, scale: f32, normalize: bool) -> Self {
        Self {
            crop_size,
            scale,
            normalize,
        }
    }

    pub fn crop_size(&self) -> usize {
        self.crop_size
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Crop every frame of `track`, fetching images through `fetch(frame_index)`.
    ///
    /// Images are (height, width, 3) arrays. Fails on the first degenerate box
    /// or fetch error.
    pub fn sample<F>(&self, track: &Track, mut fetch: F) -> Result<CropBatch>
    where
        F: FnMut(usize) -> Result<Array3<f32>>,
    {
        let n = track.len();
        let mut crops = Array4::zeros((n, self.crop_size, self.crop_size, 3));
        let mut geometry = Vec::with_capacity(n);

        for (i, (&frame, bbox)) in track
            .frame_indices()
            .iter()
            .zip(track.bboxes())
            .enumerate()
        {
            let geom = CropGeometry::from_bbox(bbox, self.scale)?;
            let image = fetch(frame)?;
            if image.is_empty() {
                return Err(Error::EmptyFrame { frame });
            }
            self.crop_into(image.view(), &geom, crops.index_axis_mut(Axis(0), i));
            geometry.push(geom);
        }

        let keypoints = track
            .joints2d()
            .map(|j2d| normalize_keypoints(j2d, &geometry));

        Ok(CropBatch {
            crops,
            keypoints,
            geometry,
        })
    }

    /// Sample a single crop of `image` under `geom`.
    pub fn crop(&self, image: ArrayView3<f32>, geom: &CropGeometry) -> Array3<f32> {
        let mut out = Array3::zeros((self.crop_size, self.crop_size, 3));
        self.crop_into(image, geom, out.view_mut());
        out
    }

    fn crop_into(
        &self,
        image: ArrayView3<f32>,
        geom: &CropGeometry,
        mut out: ndarray::ArrayViewMut3<f32>,
    ) {
        let size = self.crop_size as f32;
        let channels = image.len_of(Axis(2)).min(3);
        for row in 0..self.crop_size {
            for col in 0..self.crop_size {
                // pixel centers map to crop-normalized coordinates in (-1, 1)
                let u = 2.0 * (col as f32 + 0.5) / size - 1.0;
                let v = 2.0 * (row as f32 + 0.5) / size - 1.0;
                let (x, y) = geom.denormalize(u, v);
                for c in 0..channels {
                    let mut value = bilinear(&image, x - 0.5, y - 0.5, c);
                    if self.normalize {
                        value = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
                    }
                    out[[row, col, c]] = value;
                }
            }
        }
    }
}

/// Bilinear sample at continuous pixel position (x, y); outside the image reads as zero.
fn bilinear(image: &ArrayView3<f32>, x: f32, y: f32, c: usize) -> f32 {
    let (h, w, _) = image.dim();
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let at = |xi: f32, yi: f32| -> f32 {
        if xi < 0.0 || yi < 0.0 || xi >= w as f32 || yi >= h as f32 {
            0.0
        } else {
            image[[yi as usize, xi as usize, c]]
        }
    };

    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1.0, y0) * fx;
    let bottom = at(x0, y0 + 1.0) * (1.0 - fx) + at(x0 + 1.0, y0 + 1.0) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Map image-pixel keypoints into each frame's crop-normalized space, keeping confidence.
pub fn normalize_keypoints(joints2d: &Array3<f32>, geometry: &[CropGeometry]) -> Array3<f32> {
    let mut out = joints2d.clone();
    for (mut frame, geom) in out.outer_iter_mut().zip(geometry) {
        for mut kp in frame.rows_mut() {
            let (u, v) = geom.normalize(kp[0], kp[1]);
            kp[0] = u;
            kp[1] = v;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::bbox::BBox;

    fn gradient_image(h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((h, w, 3), |(y, x, c)| match c {
            0 => x as f32 / w as f32,
            1 => y as f32 / h as f32,
            _ => 0.5,
        })
    }

    #[test]
    fn test_crop_center_matches_bbox_center() {
        let image = gradient_image(200, 200);
        let sampler = CropSampler::new(64, 1.0, false);
        let geom = CropGeometry::from_bbox(&BBox::new(100.0, 100.0, 50.0, 50.0), 1.0).unwrap();
        let crop = sampler.crop(image.view(), &geom);
        assert_eq!(crop.dim(), (64, 64, 3));
        // Center of the crop sits on pixel (100, 100) of a linear gradient
        let center = (crop[[31, 31, 0]] + crop[[32, 32, 0]]) / 2.0;
        assert!((center - 100.0 / 200.0).abs() < 1e-2, "center {center}");
    }

    #[test]
    fn test_crop_outside_image_is_zero_padded() {
        let image = Array3::from_elem((20, 20, 3), 1.0);
        let sampler = CropSampler::new(16, 1.0, false);
        let geom = CropGeometry::from_bbox(&BBox::new(0.0, 0.0, 20.0, 20.0), 1.0).unwrap();
        let crop = sampler.crop(image.view(), &geom);
        assert_eq!(crop[[0, 0, 0]], 0.0);
        assert!(crop[[15, 15, 0]] > 0.99);
    }

    #[test]
    fn test_normalization_applied() {
        let image = Array3::from_elem((10, 10, 3), 0.485);
        let sampler = CropSampler::new(4, 0.5, true);
        let geom = CropGeometry::from_bbox(&BBox::new(5.0, 5.0, 10.0, 10.0), 0.5).unwrap();
        let crop = sampler.crop(image.view(), &geom);
        assert!(crop[[2, 2, 0]].abs() < 1e-5);
    }

    #[test]
    fn test_sample_keeps_track_order_and_keypoints() {
        let track = Track::new(
            1,
            vec![3, 7],
            vec![
                BBox::new(50.0, 50.0, 20.0, 20.0),
                BBox::new(60.0, 40.0, 10.0, 30.0),
            ],
            Some(Array3::from_shape_vec(
                (2, 1, 3),
                vec![50.0, 50.0, 0.9, 60.0, 55.0, 0.7],
            )
            .unwrap()),
        )
        .unwrap();

        let mut seen = Vec::new();
        let sampler = CropSampler::new(8, 1.0, false);
        let batch = sampler
            .sample(&track, |frame| {
                seen.push(frame);
                Ok(Array3::zeros((100, 100, 3)))
            })
            .unwrap();

        assert_eq!(seen, vec![3, 7]);
        assert_eq!(batch.len(), 2);
        let kps = batch.keypoints.unwrap();
        assert_eq!([kps[[0, 0, 0]], kps[[0, 0, 1]], kps[[0, 0, 2]]], [0.0, 0.0, 0.9]);
        // second frame: side 30, half 15 -> (60-60)/15, (55-40)/15
        assert!((kps[[1, 0, 1]] - 1.0).abs() < 1e-6);
        assert_eq!(kps[[1, 0, 2]], 0.7);
    }

    #[test]
    fn test_sample_rejects_degenerate_box() {
        let track = Track::new(1, vec![0], vec![BBox::new(5.0, 5.0, 0.0, 10.0)], None).unwrap();
        let sampler = CropSampler::new(8, 1.1, false);
        let err = sampler
            .sample(&track, |_| Ok(Array3::zeros((10, 10, 3))))
            .unwrap_err();
        assert!(matches!(err, Error::DegenerateBox { .. }));
    }
}
