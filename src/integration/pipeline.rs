//! ReconstructionPipeline for turning tracklets into per-subject body sequences.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, Axis};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::motion::{
    BodyModel, CropSampler, FrameRenderSet, PersonResult, PersonResultRecord, RefineInput,
    SubjectId, TemporalRefiner, TemporalSmoother, Track, TrackInput, crop_keypoints_to_orig,
    filter_tracks, forward_sequence, merge_rows, project_joints, remap_cameras,
};

use super::{FrameSource, SequencePredictor, predict_sequence};

/// A subject whose reconstruction failed; the rest of the run is unaffected.
#[derive(Debug)]
pub struct SubjectFailure {
    pub subject_id: SubjectId,
    pub error: Error,
}

/// Everything one run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub results: BTreeMap<SubjectId, PersonResult>,
    pub failures: Vec<SubjectFailure>,
    /// Subjects dropped for having too few frames
    pub filtered: Vec<SubjectId>,
}

impl RunReport {
    /// Per-frame view of all reconstructed subjects.
    pub fn render_set(&self) -> FrameRenderSet {
        FrameRenderSet::from_results(&self.results)
    }
}

/// Parameter sequences as they move through refinement and smoothing.
struct Sequence {
    camera: Array2<f32>,
    pose: Array2<f32>,
    shape: Array2<f32>,
    verts: Array3<f32>,
    joints3d: Array3<f32>,
    joints2d: Array3<f32>,
}

/// Bundles the crop sampler, a sequence predictor, the body model and the
/// optional refinement and smoothing stages into one per-subject pipeline.
///
/// Subjects are processed one after another and independently of each other.
pub struct ReconstructionPipeline<P, M, F> {
    config: PipelineConfig,
    sampler: CropSampler,
    refiner: Option<TemporalRefiner>,
    smoother: Option<TemporalSmoother>,
    predictor: P,
    body_model: M,
    frames: F,
}

impl<P, M, F> ReconstructionPipeline<P, M, F>
where
    P: SequencePredictor,
    M: BodyModel,
    F: FrameSource,
{
    /// Create a new pipeline, validating the configuration up front.
    pub fn new(config: PipelineConfig, predictor: P, body_model: M, frames: F) -> Result<Self> {
        config.validate()?;
        let sampler = CropSampler::new(config.crop_size, config.bbox_scale, config.normalize_crops);
        let refiner = config
            .refine
            .clone()
            .map(|c| TemporalRefiner::new(c, config.crop_size))
            .transpose()?;
        let smoother = config.smooth.clone().map(TemporalSmoother::new).transpose()?;
        Ok(Self {
            config,
            sampler,
            refiner,
            smoother,
            predictor,
            body_model,
            frames,
        })
    }

    /// Create a new pipeline with the default configuration.
    pub fn with_default_config(predictor: P, body_model: M, frames: F) -> Result<Self> {
        Self::new(PipelineConfig::default(), predictor, body_model, frames)
    }

    /// Validate raw tracker output and run. Any malformed subject aborts the
    /// whole run before reconstruction starts.
    pub fn run_inputs(&mut self, inputs: BTreeMap<SubjectId, TrackInput>) -> Result<RunReport> {
        let tracks = inputs
            .into_iter()
            .map(|(id, input)| input.into_track(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.run(tracks))
    }

    /// Reconstruct every track that passes the length filter.
    ///
    /// A subject that fails is recorded in [`RunReport::failures`] and the
    /// remaining subjects are still processed.
    pub fn run(&mut self, tracks: Vec<Track>) -> RunReport {
        let total = tracks.len();
        let (tracks, filtered) = filter_tracks(tracks, self.config.min_track_len);
        tracing::info!(
            subjects = total,
            kept = tracks.len(),
            filtered = filtered.len(),
            "starting reconstruction"
        );

        let mut report = RunReport {
            filtered,
            ..Default::default()
        };
        for track in &tracks {
            let subject_id = track.subject_id();
            match self.process_track(track) {
                Ok(result) => {
                    report.results.insert(subject_id, result);
                }
                Err(error) => {
                    tracing::warn!(subject_id, %error, "subject reconstruction failed");
                    report.failures.push(SubjectFailure { subject_id, error });
                }
            }
        }

        tracing::info!(
            reconstructed = report.results.len(),
            failed = report.failures.len(),
            "reconstruction finished"
        );
        report
    }

    /// Reconstruct a single subject.
    pub fn process_track(&mut self, track: &Track) -> Result<PersonResult> {
        let subject_id = track.subject_id();
        let (width, height) = self.frames.dimensions();

        let frames = &mut self.frames;
        let batch = self.sampler.sample(track, |frame| {
            frames.frame(frame).map_err(|e| Error::FrameSource {
                frame,
                source: Box::new(e),
            })
        })?;

        let prediction = predict_sequence(&mut self.predictor, batch.crops.view(), self.config.batch_size)?;
        // The batch carries no vertices, so they come from the body model.
        let (verts, _) =
            forward_sequence(&self.body_model, prediction.pose.view(), prediction.shape.view())?;
        let mut seq = Sequence {
            camera: prediction.camera,
            pose: prediction.pose,
            shape: prediction.shape,
            verts,
            joints3d: prediction.joints3d,
            joints2d: prediction.joints2d,
        };
        let mut geometry_changed = false;

        if let Some(refiner) = &self.refiner {
            match &batch.keypoints {
                None => tracing::warn!(subject_id, "no 2D keypoints, skipping refinement"),
                Some(keypoints) => {
                    let outcome = refiner.refine(
                        &self.body_model,
                        RefineInput {
                            pose: seq.pose.view(),
                            shape: seq.shape.view(),
                            camera: seq.camera.view(),
                            keypoints: keypoints.view(),
                        },
                    )?;
                    let update = &outcome.update;
                    let refined = &outcome.refined;
                    if refined.joints3d.dim() != seq.joints3d.dim() {
                        return Err(Error::ShapeMismatch(format!(
                            "predicted joints {:?} do not match body model joints {:?}",
                            seq.joints3d.dim(),
                            refined.joints3d.dim()
                        )));
                    }
                    seq.camera = merge_rows(seq.camera.view(), refined.camera.view(), update)?;
                    seq.pose = merge_rows(seq.pose.view(), refined.pose.view(), update)?;
                    seq.shape = merge_rows(seq.shape.view(), refined.shape.view(), update)?;
                    seq.verts = merge_rows(seq.verts.view(), refined.vertices.view(), update)?;
                    seq.joints3d = merge_rows(seq.joints3d.view(), refined.joints3d.view(), update)?;
                    geometry_changed |= outcome.updated_count() > 0;
                    tracing::info!(
                        subject_id,
                        updated = outcome.updated_count(),
                        frames = update.len(),
                        "refinement update ratio"
                    );
                }
            }
        }

        if let Some(smoother) = &self.smoother {
            let smoothed = smoother.smooth(
                &self.body_model,
                seq.pose.view(),
                seq.shape.view(),
                track.frame_indices(),
            )?;
            seq.pose = smoothed.pose;
            seq.shape = smoothed.shape;
            seq.verts = smoothed.vertices;
            seq.joints3d = smoothed.joints3d;
            geometry_changed = true;
        }

        // Predicted 2D keypoints follow the final geometry when both use the same joint set.
        if geometry_changed && seq.joints2d.len_of(Axis(1)) == seq.joints3d.len_of(Axis(1)) {
            seq.joints2d = project_joints(seq.joints3d.view(), seq.camera.view())?;
        }

        let orig_cam = remap_cameras(seq.camera.view(), &batch.geometry, width, height)?;
        let joints2d_img_coord = crop_keypoints_to_orig(seq.joints2d.view(), &batch.geometry)?;

        let result = PersonResult::try_from(PersonResultRecord {
            pred_cam: seq.camera,
            orig_cam,
            verts: seq.verts,
            pose: seq.pose,
            betas: seq.shape,
            joints3d: seq.joints3d,
            joints2d: track.joints2d().cloned(),
            joints2d_img_coord,
            bboxes: track.bboxes().to_vec(),
            frame_ids: track.frame_indices().to_vec(),
        })?;
        tracing::info!(subject_id, frames = result.len(), "subject reconstructed");
        Ok(result)
    }

    /// Get the active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get a reference to the underlying predictor.
    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    /// Get a mutable reference to the underlying predictor.
    pub fn predictor_mut(&mut self) -> &mut P {
        &mut self.predictor
    }

    /// Get a reference to the underlying body model.
    pub fn body_model(&self) -> &M {
        &self.body_model
    }

    /// Get a mutable reference to the underlying frame source.
    pub fn frames_mut(&mut self) -> &mut F {
        &mut self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmoothConfig;
    use crate::integration::predictor::testing::EchoPredictor;
    use crate::integration::{InMemoryFrames, TrackBuilder};
    use crate::motion::{BBox, BodyOutput};
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayView1, Array3};

    struct PlainBody;

    impl BodyModel for PlainBody {
        type Error = std::convert::Infallible;

        fn forward(
            &self,
            pose: ArrayView1<f32>,
            _shape: ArrayView1<f32>,
        ) -> Result<BodyOutput, Self::Error> {
            let joints3d = Array2::from_shape_fn((3, 3), |(j, _)| 0.1 * j as f32 + pose[0] * 0.01);
            Ok(BodyOutput {
                vertices: joints3d.clone(),
                joints3d,
            })
        }
    }

    fn frames(range: std::ops::Range<usize>) -> InMemoryFrames {
        let mut frames = InMemoryFrames::new(64, 48);
        for f in range {
            frames.insert(f, Array3::from_elem((48, 64, 3), f as f32));
        }
        frames
    }

    fn track(id: SubjectId, range: std::ops::Range<usize>) -> Track {
        range
            .fold(TrackBuilder::new(id), |b, f| b.bbox(f, BBox::new(32.0, 24.0, 20.0, 30.0)))
            .build()
            .unwrap()
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            crop_size: 8,
            normalize_crops: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_pipeline_reconstructs_and_filters() {
        let mut pipeline =
            ReconstructionPipeline::new(small_config(), EchoPredictor::new(10), PlainBody, frames(0..40))
                .unwrap();
        let report = pipeline.run(vec![track(1, 0..30), track(2, 5..29)]);

        assert_eq!(report.filtered, vec![2]);
        assert!(report.failures.is_empty());
        let person = &report.results[&1];
        assert_eq!(person.len(), 30);
        assert_eq!(person.frame_ids()[0], 0);
        assert_eq!(person.orig_cam().dim(), (30, 4));
        assert_eq!(person.verts().dim(), (30, 3, 3));
        assert!(person.joints2d().is_none());
        assert_eq!(pipeline.predictor().calls, vec![10, 10, 10]);
    }

    #[test]
    fn test_missing_frame_fails_only_that_subject() {
        let mut pipeline =
            ReconstructionPipeline::new(small_config(), EchoPredictor::new(50), PlainBody, frames(0..30))
                .unwrap();
        let report = pipeline.run(vec![track(1, 0..30), track(2, 10..40)]);

        assert!(report.results.contains_key(&1));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].subject_id, 2);
        assert!(matches!(
            report.failures[0].error,
            Error::FrameSource { frame: 30, .. }
        ));
    }

    #[test]
    fn test_smoothing_keeps_first_frame() {
        let config = PipelineConfig {
            smooth: Some(SmoothConfig::default()),
            ..small_config()
        };
        let mut pipeline =
            ReconstructionPipeline::new(config, EchoPredictor::new(50), PlainBody, frames(0..30)).unwrap();
        let report = pipeline.run(vec![track(1, 0..30)]);
        let person = &report.results[&1];

        // Echo pose tags every frame with its first crop pixel, which the crop keeps.
        assert_eq!(person.pose()[[0, 0]], 0.0);
        assert!(person.pose()[[29, 0]] < 29.0);
        assert_eq!(person.joints2d_img_coord().dim(), (30, 3, 2));
    }

    #[test]
    fn test_predicted_joints_pass_through() {
        let mut pipeline =
            ReconstructionPipeline::new(small_config(), EchoPredictor::new(16), PlainBody, frames(0..30))
                .unwrap();
        let report = pipeline.run(vec![track(1, 0..30)]);
        let person = &report.results[&1];

        // Echo joints carry the frame tag; the body model would give 0.01 * tag.
        for t in [0, 17, 29] {
            for j in 0..3 {
                assert_abs_diff_eq!(person.joints3d()[[t, j, 0]], t as f32, epsilon = 1e-4);
            }
        }
        assert_abs_diff_eq!(person.verts()[[29, 1, 0]], 0.1 + 0.29, epsilon = 1e-4);
    }

    #[test]
    fn test_default_smoothing_keeps_betas() {
        let config = PipelineConfig {
            smooth: Some(SmoothConfig::default()),
            ..small_config()
        };
        let mut pipeline =
            ReconstructionPipeline::new(config, EchoPredictor::new(50), PlainBody, frames(0..30)).unwrap();
        let report = pipeline.run(vec![track(1, 0..30)]);
        let person = &report.results[&1];

        assert!(person.pose()[[29, 0]] < 29.0);
        for t in 0..30 {
            assert_abs_diff_eq!(person.betas()[[t, 0]], t as f32, epsilon = 1e-4);
            assert_abs_diff_eq!(person.betas()[[t, 1]], t as f32, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            crop_size: 0,
            ..Default::default()
        };
        assert!(ReconstructionPipeline::new(config, EchoPredictor::new(4), PlainBody, frames(0..1)).is_err());
    }

    #[test]
    fn test_run_inputs_aborts_on_malformed_subject() {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            1,
            TrackInput {
                frames: vec![0, 1],
                bbox: Some(vec![[1.0, 1.0, 2.0, 2.0]]),
                joints2d: None,
            },
        );
        let mut pipeline =
            ReconstructionPipeline::with_default_config(EchoPredictor::new(4), PlainBody, frames(0..2)).unwrap();
        assert!(matches!(
            pipeline.run_inputs(inputs),
            Err(Error::TrackLengthMismatch { subject_id: 1, .. })
        ));
    }
}
