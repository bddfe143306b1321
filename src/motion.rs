mod aggregate;
mod bbox;
mod body_model;
mod crop;
mod one_euro;
mod refine;
mod remap;
mod result;
mod smooth;
mod track;

pub use aggregate::{DrawItem, FrameRenderSet, FrameRenderer, RenderEntry, subject_color};
pub use bbox::{BBox, CropGeometry};
pub use body_model::{BodyModel, BodyOutput, forward_sequence};
pub use crop::{CropBatch, CropSampler, IMAGENET_MEAN, IMAGENET_STD, normalize_keypoints};
pub use one_euro::OneEuroFilter;
pub use refine::{RefineInput, RefinedSequence, RefinementOutcome, TemporalRefiner, merge_rows};
pub use remap::{
    CropCamera, OrigCamera, crop_cam_to_orig, crop_keypoints_to_orig, project_joints, remap_cameras,
};
pub use result::{PersonResult, PersonResultRecord, load_results, save_results};
pub use smooth::{SmoothedSequence, TemporalSmoother};
pub use track::{MIN_NUM_FRAMES, SubjectId, Track, TrackInput, filter_tracks, load_tracks};
