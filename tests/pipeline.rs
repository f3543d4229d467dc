use nalgebra as na;
use ndarray::Array2;
use pedtrack::export::TxtWriter;
use pedtrack::missing_frames::MissingFrames;
use pedtrack::stereo::{DisparityMap, StereoParams};
use pedtrack::{
    CancelToken, Calibration, Error, ExportOptions, ExtrinsicParams, Image, IntrinsicParams,
    MemorySource, Pipeline, PipelineConfig, PointSource, RecognitionMethod, Rgb, Selection,
    TrackPoint, TrackerReal,
};

const GREEN: Rgb = Rgb::new(20, 200, 30);
const GREY: Rgb = Rgb::new(90, 90, 90);

fn disc_at(f: usize) -> na::Point2<f64> {
    na::Point2::new(40.0 + 2.0 * f as f64, 60.0)
}

fn frame(f: usize) -> Image {
    let mut img = Image::filled(160, 120, GREY);
    let c = disc_at(f);
    img.fill_circle(c.x, c.y, 10.0, GREEN);
    img
}

fn color_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.recognition.method = RecognitionMethod::Color;
    config
}

fn overhead() -> Calibration {
    let rot = na::Rotation3::from_axis_angle(&na::Vector3::x_axis(), std::f64::consts::PI);
    let ext = ExtrinsicParams::from_center(&rot, &na::Point3::new(0.0, 0.0, 1000.0));
    Calibration::new(IntrinsicParams::pinhole(1000.0, 1000.0, 80.0, 60.0), Some(ext))
}

#[test]
fn walking_marker_becomes_one_person() {
    let pipeline = Pipeline::new(color_config()).unwrap();
    let mut source = MemorySource::from_images((0..8).map(frame), 25.0);
    let mut calls = Vec::new();

    let report = pipeline
        .track_all(&mut source, 0..8, &CancelToken::new(), |done, total| calls.push((done, total)))
        .unwrap()
        .unwrap();

    assert_eq!(report.frames, 16);
    assert!(report.skipped.is_empty());
    assert_eq!(report.recognized, 8);
    assert_eq!(report.created, 1);
    assert_eq!(calls.len(), 16);
    assert_eq!(calls.last(), Some(&(16, 16)));

    let snap = pipeline.snapshot();
    assert_eq!(snap.storage.nb_persons(), 1);

    let person = snap.storage.at(0).unwrap();
    assert_eq!((person.first_frame(), person.last_frame(), person.len()), (0, 7, 8));
    for (f, tp) in person.iter() {
        assert_eq!(tp.source, PointSource::Recognized);
        assert!(tp.distance(&disc_at(f)) < 1.0, "frame {}: {:?}", f, tp.pos);
    }
}

#[test]
fn backward_pass_extends_late_person() {
    let mut config = color_config();
    config.recognition.enabled = false;
    let pipeline = Pipeline::new(config).unwrap();

    pipeline.with_state(|s| {
        s.storage_mut()
            .add_point(TrackPoint::manual(disc_at(7)), 7, &Selection::All, RecognitionMethod::Color)
    });

    let mut source = MemorySource::from_images((0..8).map(frame), 25.0);
    let report = pipeline
        .track_all(&mut source, 0..8, &CancelToken::new(), |_, _| {})
        .unwrap()
        .unwrap();
    assert_eq!(report.recognized, 0);
    assert_eq!(report.tracked, 7);

    let snap = pipeline.snapshot();
    assert_eq!(snap.storage.nb_persons(), 1);

    let person = snap.storage.at(0).unwrap();
    assert_eq!((person.first_frame(), person.last_frame(), person.len()), (0, 7, 8));
    assert_eq!(person.at(7).unwrap().source, PointSource::Manual);

    let first = person.at(0).unwrap();
    assert_eq!(first.source, PointSource::Tracked);
    assert!(first.distance(&disc_at(0)) < 3.0, "{:?}", first.pos);
}

#[test]
fn undecodable_frames_are_skipped() {
    let frames = (0..6).map(|f| (f != 3).then(|| frame(f))).collect();
    let mut source = MemorySource::new(frames, 25.0);
    let pipeline = Pipeline::new(color_config()).unwrap();

    let report = pipeline
        .track_all(&mut source, 0..10, &CancelToken::new(), |_, _| {})
        .unwrap()
        .unwrap();

    // the range is clipped to the source length
    assert_eq!(report.frames, 10);
    assert_eq!(report.skipped, vec![3]);

    let snap = pipeline.snapshot();
    assert_eq!(snap.storage.visible(3), 0);
    assert_eq!(snap.storage.visible(2), 1);
    assert_eq!(snap.storage.visible(4), 1);
}

#[test]
fn busy_pipeline_drops_requests() {
    let pipeline = Pipeline::new(color_config()).unwrap();
    let img = frame(0);

    let inner = pipeline.with_state(|_| pipeline.process_frame(0, &img));
    assert!(matches!(inner, Ok(None)));

    let mut source = MemorySource::from_images((0..2).map(frame), 25.0);
    let batch = pipeline.with_state(|_| {
        pipeline.track_all(&mut source, 0..2, &CancelToken::new(), |_, _| {})
    });
    assert!(matches!(batch, Ok(None)));

    assert!(pipeline.snapshot().storage.is_empty());
}

#[test]
fn single_frames_and_change_flags() {
    let pipeline = Pipeline::new(color_config()).unwrap();
    assert!(pipeline.snapshot().track_changed);

    let r = pipeline.process_frame(0, &frame(0)).unwrap().unwrap();
    assert_eq!(r.recognized, 1);
    assert_eq!(r.added.created, vec![0]);
    assert_eq!(r.visible, 1);

    let r = pipeline.process_frame(1, &frame(1)).unwrap().unwrap();
    assert_eq!(r.added.extended, vec![0]);
    assert!(r.added.created.is_empty());

    let snap = pipeline.snapshot();
    assert!(!snap.track_changed);
    assert!(!snap.recognition_changed);

    pipeline.with_state(|s| {
        s.storage_mut().set_comment(&disc_at(1), 1, &Selection::All, "first");
    });
    assert!(pipeline.snapshot().track_changed);

    pipeline
        .with_state(|s| {
            let mut config = s.config().clone();
            config.recognition.step = 2;
            s.set_config(config)
        })
        .unwrap();
    let snap = pipeline.snapshot();
    assert!(snap.recognition_changed);
    assert_eq!(snap.config.recognition.step, 2);
    assert_eq!(snap.storage.at(0).unwrap().comment, "first");

    let bad = pipeline.with_state(|s| {
        let mut config = s.config().clone();
        config.recognition.step = 0;
        s.set_config(config)
    });
    assert!(matches!(bad, Err(Error::InvalidConfig(_))));
    assert_eq!(pipeline.snapshot().config.recognition.step, 2);
}

#[test]
fn cancelled_batch_keeps_storage() {
    let pipeline = Pipeline::new(color_config()).unwrap();
    let mut source = MemorySource::from_images((0..4).map(frame), 25.0);
    let cancel = CancelToken::new();
    cancel.cancel();

    let res = pipeline.track_all(&mut source, 0..4, &cancel, |_, _| {});
    assert!(matches!(res, Err(Error::Cancelled)));
    assert!(pipeline.snapshot().storage.is_empty());

    // a cancel raised from the progress callback stops after that frame
    cancel.reset();
    let stop = cancel.clone();
    let res = pipeline.track_all(&mut source, 0..4, &cancel, move |done, _| {
        if done == 2 {
            stop.cancel();
        }
    });
    assert!(matches!(res, Err(Error::Cancelled)));

    let snap = pipeline.snapshot();
    assert_eq!(snap.storage.nb_persons(), 1);
    assert_eq!(snap.storage.largest_last_frame(), Some(1));
}

#[test]
fn tracked_video_exports_world_coordinates() {
    let pipeline = Pipeline::new(color_config()).unwrap();
    let mut source = MemorySource::from_images((0..5).map(frame), 25.0);
    pipeline
        .track_all(&mut source, 0..5, &CancelToken::new(), |_, _| {})
        .unwrap()
        .unwrap();

    let snap = pipeline.snapshot();
    let options = ExportOptions::default();
    let mut real = TrackerReal::new();
    let n = real
        .calculate(&snap.storage, &overhead(), &snap.missing_frames, &options, &Selection::All)
        .unwrap();
    assert_eq!(n, 1);

    let mut writer = TxtWriter::new(Vec::new());
    let rows = real
        .export(&mut writer, 25.0, Some("walk.toml"), &options, &CancelToken::new())
        .unwrap();
    assert_eq!(rows, 5);

    let text = String::from_utf8(writer.into_inner()).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], "# project: walk.toml");
    assert_eq!(lines.len(), 3 + 5);

    let cols: Vec<_> = lines[3].split_whitespace().collect();
    assert_eq!(cols[..2], ["1", "0"]);
    assert_eq!(cols[4], "175.0000");

    // default height, camera 825 cm above the head, 1000 px focal length
    let x: f64 = cols[2].parse().unwrap();
    assert!((x - (40.0 - 80.0) * 825.0 / 1000.0).abs() < 1.0, "{}", x);

    assert!(matches!(
        TrackerReal::new().calculate(
            &snap.storage,
            &Calibration::default(),
            &MissingFrames::default(),
            &options,
            &Selection::All
        ),
        Err(Error::NotCalibrated)
    ));
}

/// Ground at 25 px disparity, a 150 cm high 20x20 block at 40 px moving
/// like the colour disc.
fn disparity(f: usize) -> DisparityMap {
    let params = StereoParams {
        focal_px: 1000.0,
        baseline_cm: 10.0,
        cx: 80.0,
        cy: 60.0,
        min_disparity: 0,
        max_disparity: 64,
        block_size: 7,
        camera_altitude: 400.0,
    };
    let x0 = 60 + 2 * f;
    let data = Array2::from_shape_fn((120, 160), |(y, x)| {
        if (50..70).contains(&y) && (x0..x0 + 20).contains(&x) {
            40.0
        } else {
            25.0
        }
    });

    DisparityMap::from_array(params, data)
}

fn stereo_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.recognition.method = RecognitionMethod::Stereo;
    config.tracking = false;
    config
}

#[test]
fn markerless_batch_uses_source_disparities() {
    let pipeline = Pipeline::new(stereo_config()).unwrap();
    let mut source = MemorySource::from_images((0..3).map(|_| Image::filled(160, 120, GREY)), 25.0)
        .with_disparities((0..3).map(|f| Some(disparity(f))));

    let report = pipeline
        .track_all(&mut source, 0..3, &CancelToken::new(), |_, _| {})
        .unwrap()
        .unwrap();
    assert_eq!(report.recognized, 3);
    assert_eq!(report.created, 1);

    let snap = pipeline.snapshot();
    let person = snap.storage.at(0).unwrap();
    assert_eq!(person.len(), 3);
    for (f, tp) in person.iter() {
        let expected = na::Point2::new(70.0 + 2.0 * f as f64, 60.0);
        assert!(tp.distance(&expected) < 1.0, "frame {}: {:?}", f, tp.pos);

        let world = tp.world.unwrap();
        assert!((world.z - 150.0).abs() < 1.0, "frame {}: {:?}", f, world);
    }
}

#[test]
fn markerless_batch_without_disparity_recognizes_nothing() {
    let pipeline = Pipeline::new(stereo_config()).unwrap();
    let mut source = MemorySource::from_images((0..3).map(frame), 25.0);

    let report = pipeline
        .track_all(&mut source, 0..3, &CancelToken::new(), |_, _| {})
        .unwrap()
        .unwrap();
    assert_eq!(report.frames, 6);
    assert_eq!(report.recognized, 0);
    assert!(report.skipped.is_empty());
    assert!(pipeline.snapshot().storage.is_empty());
}
