//! Frame source collaborator: decoded video frames by index.

use std::collections::BTreeMap;

use ndarray::Array3;

/// Supplies decoded frames as (height, width, 3) f32 images.
///
/// Every frame of one video shares the size reported by [`dimensions`](Self::dimensions).
pub trait FrameSource {
    /// Error type for decoding failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// (width, height) of every frame, in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Fetch the frame with the given index.
    fn frame(&mut self, index: usize) -> Result<Array3<f32>, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
#[error("frame {0} is not in memory")]
pub struct MissingFrame(pub usize);

/// Frames held in memory, keyed by frame index.
#[derive(Debug, Clone)]
pub struct InMemoryFrames {
    width: u32,
    height: u32,
    frames: BTreeMap<usize, Array3<f32>>,
}

impl InMemoryFrames {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: BTreeMap::new(),
        }
    }

    /// Store `image` as frame `index`, replacing any previous one.
    pub fn insert(&mut self, index: usize, image: Array3<f32>) {
        self.frames.insert(index, image);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for InMemoryFrames {
    type Error = MissingFrame;

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame(&mut self, index: usize) -> Result<Array3<f32>, Self::Error> {
        self.frames.get(&index).cloned().ok_or(MissingFrame(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_lookup() {
        let mut frames = InMemoryFrames::new(4, 2);
        frames.insert(3, Array3::ones((2, 4, 3)));

        assert_eq!(frames.dimensions(), (4, 2));
        assert_eq!(frames.frame(3).unwrap().dim(), (2, 4, 3));
        assert!(matches!(frames.frame(0), Err(MissingFrame(0))));
    }
}
