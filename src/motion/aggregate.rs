//! Per-frame view of all subjects, for rendering and export.

use std::collections::BTreeMap;

use ndarray::{Array2, Axis};

use crate::motion::remap::OrigCamera;
use crate::motion::result::PersonResult;
use crate::motion::track::SubjectId;

/// Geometry and camera of one subject at one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderEntry {
    /// (vertices, 3)
    pub vertices: Array2<f32>,
    pub camera: OrigCamera,
}

/// What a renderer receives for one subject at one frame.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem<'a> {
    pub subject_id: SubjectId,
    pub entry: &'a RenderEntry,
    pub color: [f32; 3],
}

/// Draws the meshes of one frame. Pixels are entirely the renderer's concern.
pub trait FrameRenderer {
    type Error;

    fn render(&mut self, frame_index: usize, items: &[DrawItem<'_>]) -> Result<(), Self::Error>;
}

/// frame index -> subject id -> render entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameRenderSet {
    frames: BTreeMap<usize, BTreeMap<SubjectId, RenderEntry>>,
}

impl FrameRenderSet {
    pub fn from_results(results: &BTreeMap<SubjectId, PersonResult>) -> Self {
        let mut frames: BTreeMap<usize, BTreeMap<SubjectId, RenderEntry>> = BTreeMap::new();
        for (&subject_id, person) in results {
            for (position, &frame) in person.frame_ids().iter().enumerate() {
                let entry = RenderEntry {
                    vertices: person.verts().index_axis(Axis(0), position).to_owned(),
                    camera: person.orig_camera_at(position),
                };
                frames.entry(frame).or_default().insert(subject_id, entry);
            }
        }
        Self { frames }
    }

    /// Subjects present at `frame`, or `None` if nobody was tracked there.
    pub fn frame(&self, frame: usize) -> Option<&BTreeMap<SubjectId, RenderEntry>> {
        self.frames.get(&frame)
    }

    pub fn frame_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Every subject that appears anywhere, with its color.
    pub fn colors(&self) -> BTreeMap<SubjectId, [f32; 3]> {
        self.frames
            .values()
            .flat_map(|subjects| subjects.keys())
            .map(|&id| (id, subject_color(id)))
            .collect()
    }

    /// Subjects at `frame` ordered back to front: smallest camera scale first,
    /// ties broken by subject id.
    pub fn draw_order(&self, frame: usize) -> Vec<DrawItem<'_>> {
        let Some(subjects) = self.frames.get(&frame) else {
            return Vec::new();
        };
        let mut items: Vec<DrawItem<'_>> = subjects
            .iter()
            .map(|(&subject_id, entry)| DrawItem {
                subject_id,
                entry,
                color: subject_color(subject_id),
            })
            .collect();
        items.sort_by(|a, b| {
            a.entry
                .camera
                .sy
                .total_cmp(&b.entry.camera.sy)
                .then(a.subject_id.cmp(&b.subject_id))
        });
        items
    }

    /// Hand every frame, in ascending order, to `renderer`.
    pub fn render_with<R: FrameRenderer>(&self, renderer: &mut R) -> Result<(), R::Error> {
        for frame in self.frame_indices() {
            renderer.render(frame, &self.draw_order(frame))?;
        }
        Ok(())
    }
}

/// Mesh color for a subject: HSV (hue, 0.5, 1.0) with the hue hashed from the id.
pub fn subject_color(subject_id: SubjectId) -> [f32; 3] {
    // splitmix64 finalizer
    let mut z = subject_id.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    let hue = (z >> 40) as f32 / (1u64 << 24) as f32;
    hsv_to_rgb(hue, 0.5, 1.0)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as u32 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}
