use approx::assert_abs_diff_eq;
use bodytrack_rs::motion::{CropGeometry, load_results, save_results};
use bodytrack_rs::{
    BBox, BodyModel, BodyOutput, Error, FrameSource, InMemoryFrames, PipelineConfig,
    PredictionBatch, ReconstructionPipeline, RefineConfig, SequencePredictor, SubjectId, Track,
    TrackBuilder,
};
use ndarray::{Array2, Array3, ArrayView1, ArrayView4, Axis};

const JOINTS: usize = 4;
const WIDTH: u32 = 80;
const HEIGHT: u32 = 60;

/// Joint layout that only depends on the first pose channel.
struct StickFigure;

impl BodyModel for StickFigure {
    type Error = std::convert::Infallible;

    fn forward(&self, pose: ArrayView1<f32>, _shape: ArrayView1<f32>) -> Result<BodyOutput, Self::Error> {
        let lift = 0.01 * pose[0];
        let joints3d = Array2::from_shape_fn((JOINTS, 3), |(j, c)| match c {
            0 => 0.2 * j as f32 - 0.3,
            1 => 0.3 * (j % 2) as f32 - 0.15 + lift,
            _ => 0.0,
        });
        Ok(BodyOutput {
            vertices: joints3d.clone(),
            joints3d,
        })
    }
}

/// Predicts an identity camera and zero pose for every frame.
struct FlatPredictor;

impl SequencePredictor for FlatPredictor {
    type Error = std::convert::Infallible;

    fn max_window(&self) -> usize {
        16
    }

    fn predict(&mut self, window: ArrayView4<f32>) -> Result<PredictionBatch, Self::Error> {
        let n = window.len_of(Axis(0));
        Ok(PredictionBatch {
            camera: Array2::from_shape_fn((n, 3), |(_, c)| if c == 0 { 1.0 } else { 0.0 }),
            pose: Array2::zeros((n, 6)),
            shape: Array2::zeros((n, 2)),
            joints3d: Array3::zeros((n, JOINTS, 3)),
            joints2d: Array3::zeros((n, JOINTS, 2)),
        })
    }
}

fn video(frames: usize) -> InMemoryFrames {
    let mut source = InMemoryFrames::new(WIDTH, HEIGHT);
    for f in 0..frames {
        source.insert(f, Array3::from_elem((HEIGHT as usize, WIDTH as usize, 3), 0.5));
    }
    source
}

fn subject_box() -> BBox {
    BBox::new(40.0, 30.0, 20.0, 30.0)
}

fn track(id: SubjectId, frames: std::ops::Range<usize>) -> Track {
    frames
        .fold(TrackBuilder::new(id), |b, f| b.bbox(f, subject_box()))
        .build()
        .unwrap()
}

/// Keypoints in image pixels that the stick figure matches exactly under camera (0.8, 0.1, 0.0).
fn observed_keypoints(frames: usize) -> Array3<f32> {
    let geom = CropGeometry::from_bbox(&subject_box(), 1.1).unwrap();
    let pose = Array2::<f32>::zeros((1, 6));
    let shape = Array2::<f32>::zeros((1, 2));
    let body = StickFigure.forward(pose.row(0), shape.row(0)).unwrap();
    Array3::from_shape_fn((frames, JOINTS, 3), |(_, j, c)| {
        let u = 0.8 * (body.joints3d[[j, 0]] + 0.1);
        let v = 0.8 * body.joints3d[[j, 1]];
        let (x, y) = geom.denormalize(u, v);
        [x, y, 1.0][c]
    })
}

fn config() -> PipelineConfig {
    PipelineConfig {
        crop_size: 16,
        ..Default::default()
    }
}

#[test]
fn test_short_tracks_are_filtered() {
    let mut pipeline = ReconstructionPipeline::new(config(), FlatPredictor, StickFigure, video(40)).unwrap();
    let report = pipeline.run(vec![track(1, 0..24), track(2, 0..25)]);

    assert_eq!(report.filtered, vec![1]);
    assert_eq!(report.results.keys().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(report.results[&2].len(), 25);
}

#[test]
fn test_failing_subject_does_not_block_others() {
    let degenerate = (0..30)
        .fold(TrackBuilder::new(7), |b, f| b.xywh(f, 40.0, 30.0, 0.0, 10.0))
        .build()
        .unwrap();
    let mut pipeline = ReconstructionPipeline::new(config(), FlatPredictor, StickFigure, video(40)).unwrap();
    let report = pipeline.run(vec![degenerate, track(8, 5..35)]);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].subject_id, 7);
    assert!(matches!(report.failures[0].error, Error::DegenerateBox { .. }));
    assert_eq!(report.results[&8].frame_ids()[0], 5);
}

#[test]
fn test_refinement_without_keypoints_is_skipped() {
    let config = PipelineConfig {
        refine: Some(RefineConfig::default()),
        ..config()
    };
    let mut pipeline = ReconstructionPipeline::new(config, FlatPredictor, StickFigure, video(30)).unwrap();
    let report = pipeline.run(vec![track(1, 0..30)]);

    let person = &report.results[&1];
    for row in person.pred_cam().outer_iter() {
        assert_eq!(row.to_vec(), vec![1.0, 0.0, 0.0]);
    }
}

#[test]
fn test_refinement_fits_observed_keypoints() {
    let config = PipelineConfig {
        refine: Some(RefineConfig {
            iterations: 3,
            ..Default::default()
        }),
        ..config()
    };
    let keypoints = observed_keypoints(30);
    let track = (0..30)
        .fold(TrackBuilder::new(1), |b, f| b.bbox(f, subject_box()))
        .keypoints(keypoints.clone())
        .build()
        .unwrap();

    let mut pipeline = ReconstructionPipeline::new(config, FlatPredictor, StickFigure, video(30)).unwrap();
    let report = pipeline.run(vec![track]);
    let person = &report.results[&1];

    for row in person.pred_cam().outer_iter() {
        assert_abs_diff_eq!(row[0], 0.8, epsilon = 0.05);
        assert_abs_diff_eq!(row[1], 0.1, epsilon = 0.05);
    }
    assert_eq!(person.joints2d(), Some(&keypoints));

    // Predicted image keypoints now land on the observed ones.
    let predicted = person.joints2d_img_coord();
    for t in [0, 29] {
        for j in 0..JOINTS {
            assert_abs_diff_eq!(predicted[[t, j, 0]], keypoints[[t, j, 0]], epsilon = 0.5);
            assert_abs_diff_eq!(predicted[[t, j, 1]], keypoints[[t, j, 1]], epsilon = 0.5);
        }
    }
}

#[test]
fn test_render_set_and_persistence() {
    let mut pipeline = ReconstructionPipeline::new(config(), FlatPredictor, StickFigure, video(60)).unwrap();
    let report = pipeline.run(vec![track(1, 0..30), track(2, 20..55)]);
    assert!(report.failures.is_empty());

    let set = report.render_set();
    assert_eq!(set.len(), 55);
    let at = |f: usize| -> Vec<SubjectId> { set.frame(f).unwrap().keys().copied().collect() };
    assert_eq!(at(10), vec![1]);
    assert_eq!(at(25), vec![1, 2]);
    assert_eq!(at(40), vec![2]);

    let path = std::env::temp_dir().join(format!("bodytrack-e2e-{}.json", std::process::id()));
    save_results(&path, &report.results).unwrap();
    let loaded = load_results(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, report.results);
}

#[test]
fn test_in_memory_frames_report_dimensions() {
    let source = video(1);
    assert_eq!(source.dimensions(), (WIDTH, HEIGHT));
    assert_eq!(source.len(), 1);
}
