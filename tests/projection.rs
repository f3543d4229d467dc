use nalgebra as na;
use pedtrack::person_storage::StorageConfig;
use pedtrack::world_import::import_world_txt;
use pedtrack::{Calibration, Error, ExtrinsicParams, IntrinsicParams, PersonStorage, PointSource};
use std::fs;

fn street_camera() -> Calibration {
    let mut intrinsic = IntrinsicParams::pinhole(1100.0, 1090.0, 960.0, 540.0);
    intrinsic.k1 = -0.08;
    intrinsic.k2 = 0.01;
    intrinsic.p1 = 0.0005;

    // looking down, slightly tilted towards +y
    let rotation = na::Rotation3::from_euler_angles(std::f64::consts::PI - 0.25, 0.05, 0.3);
    let extrinsic = ExtrinsicParams::from_center(&rotation, &na::Point3::new(250.0, -120.0, 800.0));

    Calibration::new(intrinsic, Some(extrinsic))
}

fn pixel_grid() -> impl Iterator<Item = na::Point2<f64>> {
    (0..5).flat_map(|i| (0..4).map(move |j| na::Point2::new(200.0 + 380.0 * i as f64, 150.0 + 250.0 * j as f64)))
}

#[test]
fn pixel_height_round_trip() {
    let cal = street_camera();

    for h in [0.0, 120.0, 175.0, 200.0] {
        for p in pixel_grid() {
            let w = cal.get_3d_point(&p, h).unwrap();
            assert!((w.z - h).abs() < 1e-9);

            let back = cal.get_image_point(&w).unwrap();
            assert!(na::distance(&back, &p) < 1e-4, "{:?} -> {:?} -> {:?}", p, w, back);
        }
    }
}

#[test]
fn heads_look_bigger_when_taller() {
    let cal = street_camera();
    let p = na::Point2::new(900.0, 600.0);

    let child = cal.head_size_px(&p, 110.0).unwrap();
    let adult = cal.head_size_px(&p, 190.0).unwrap();
    assert!(adult > child);
    assert!(child > 0.0);
}

#[test]
fn pose_recovered_from_ground_marks() {
    let cal = street_camera();
    let world: Vec<_> = (0..4)
        .flat_map(|i| (0..3).map(move |j| na::Point3::new(-100.0 + 150.0 * i as f64, -50.0 + 120.0 * j as f64, 0.0)))
        .collect();
    let image: Vec<_> = world.iter().map(|w| cal.get_image_point(w).unwrap()).collect();

    let extrinsic = ExtrinsicParams::from_correspondences(&world, &image, &cal.intrinsic).unwrap();
    let estimated = Calibration::new(cal.intrinsic, Some(extrinsic));

    assert!(estimated.reprojection_error(&world, &image).unwrap() < 1e-3);
    assert!(na::distance(&extrinsic.camera_center(), &cal.camera_center().unwrap()) < 0.1);

    assert!(ExtrinsicParams::from_correspondences(&world[..3], &image[..3], &cal.intrinsic).is_err());
}

#[test]
fn world_file_becomes_pixel_trajectories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world.txt");
    fs::write(
        &path,
        "# id frame x/cm y/cm z/cm\n1 10 100 50 172\n1 11 104 50 172\n1 13 112 51 171\n2 11 -40 20 160\n",
    )
    .unwrap();

    let cal = street_camera();
    let mut storage = PersonStorage::new(StorageConfig::default());

    assert!(matches!(
        import_world_txt(&path, &Calibration::default(), &mut storage),
        Err(Error::NotCalibrated)
    ));
    assert!(storage.is_empty());

    assert_eq!(import_world_txt(&path, &cal, &mut storage).unwrap(), 2);
    assert_eq!(storage.nb_persons(), 2);

    let first = storage.at(0).unwrap();
    assert_eq!(first.height, Some(172.0));
    assert_eq!((first.first_frame(), first.last_frame(), first.len()), (10, 13, 3));
    assert!(!first.has(12));

    let tp = first.at(13).unwrap();
    assert_eq!(tp.source, PointSource::Recognized);
    assert_eq!(tp.quality, 100);
    assert_eq!(tp.world, Some(na::Point3::new(112.0, 51.0, 171.0)));

    let w = cal.get_3d_point(&tp.pos, 171.0).unwrap();
    assert!(na::distance(&w, &na::Point3::new(112.0, 51.0, 171.0)) < 1e-3);
}
