use nalgebra as na;
use pedtrack::person_storage::StorageConfig;
use pedtrack::trc::{import_trc, read_trc, save_trc, TRC_VERSION};
use pedtrack::{
    Error, PersonStorage, PointSource, RecognitionMethod, Rgb, Selection, TrackPerson, TrackPoint,
};
use std::fs;

fn sample_storage() -> PersonStorage {
    let mut storage = PersonStorage::new(StorageConfig::default());

    for f in 0..6 {
        let a = TrackPoint::recognized(na::Point2::new(20.0 + 1.5 * f as f64, 40.25), 70 + f as i32)
            .with_color(Rgb::new(30, 180, 40))
            .with_world(na::Point3::new(f as f64, -2.0, 176.0))
            .with_marker_size(14.0 + 0.25 * f as f64);
        storage.add_point(a, f, &Selection::All, RecognitionMethod::Color);
    }

    // second person with a gap at frame 5
    let b = |f: usize| {
        TrackPoint::tracked(na::Point2::new(200.0, 10.0 + f as f64), 40)
            .with_col_point(na::Point2::new(203.0, 12.0 + f as f64))
    };
    let mut person = TrackPerson::new(0, 3, b(3));
    for f in [4, 6, 7] {
        assert!(person.insert(f, b(f)));
    }
    storage.add_person(person);
    storage.add_point(
        TrackPoint::manual(na::Point2::new(200.0, 18.5)),
        8,
        &Selection::All,
        RecognitionMethod::Color,
    );

    storage.set_height(&na::Point2::new(200.0, 13.0), 3, &Selection::All, 168.5);
    storage.set_comment(
        &na::Point2::new(20.0, 40.25),
        0,
        &Selection::All,
        "waits at \"gate\"\nthen leaves",
    );

    storage
}

#[test]
fn save_and_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("walk.trc");
    let storage = sample_storage();
    assert_eq!(storage.nb_persons(), 2);

    save_trc(&path, &storage).unwrap();
    assert!(!dir.path().join("walk.trc.tmp").exists());

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with(&format!("version {}\n2\n", TRC_VERSION)));

    let mut back = PersonStorage::new(StorageConfig::default());
    assert_eq!(import_trc(&path, &mut back).unwrap(), 2);
    assert_eq!(back.persons(), storage.persons());

    let b = back.at(1).unwrap();
    assert!(!b.has(5));
    assert_eq!(b.height, Some(168.5));
    assert_eq!(b.at(8).unwrap().source, PointSource::Manual);
    assert_eq!(b.at(8).unwrap().quality, 100);
    assert_eq!(back.at(0).unwrap().comment, "waits at \"gate\"\nthen leaves");
}

#[test]
fn import_appends_to_existing_persons() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("walk.trc");
    save_trc(&path, &sample_storage()).unwrap();

    let mut storage = sample_storage();
    assert_eq!(import_trc(&path, &mut storage).unwrap(), 2);
    assert_eq!(storage.nb_persons(), 4);
    assert_eq!(storage.at(3).unwrap().nr(), 4);

    // identical trajectories are reported, never merged
    let overlaps = storage.overlaps();
    assert!(overlaps.iter().any(|o| o.first == 0 && o.second == 2));
    assert!(overlaps.iter().any(|o| o.first == 1 && o.second == 3));
}

#[test]
fn two_person_file() {
    let text = "version 4
2
1 -1 0 2 0 -1 -1 -1 \"\" -1 3
0 10 10 NaN NaN NaN 80 r NaN NaN -1 -1 -1 -1
1 11 10 NaN NaN NaN 50 t NaN NaN -1 -1 -1 -1
2 12 10 NaN NaN NaN 100 m NaN NaN -1 -1 -1 -1
2 175 4 9 0 -1 -1 -1 \"\" 12 2
4 50 50 NaN NaN NaN 90 r NaN NaN -1 -1 -1 12
9 60 50 NaN NaN NaN 90 r NaN NaN -1 -1 -1 12
";
    let file = read_trc(text.as_bytes()).unwrap();
    let mut storage = PersonStorage::new(StorageConfig::default());
    for p in file.persons {
        storage.add_person(p);
    }

    assert_eq!(storage.nb_persons(), 2);
    assert_eq!(storage.largest_last_frame(), Some(9));
    assert_eq!(storage.largest_first_frame(), Some(4));
    assert_eq!(storage.at(1).unwrap().marker_id, Some(12));
    assert_eq!(storage.at(1).unwrap().len(), 2);
}

#[test]
fn broken_file_leaves_storage_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.trc");
    fs::write(
        &path,
        "version 4\n2\n1 -1 0 0 0 -1 -1 -1 \"\" -1 1\n0 1 1 NaN NaN NaN 80 r NaN NaN -1 -1 -1 -1\n2 -1 3 4 0 -1 -1 -1 \"\" -1 2\n3 1 1 NaN NaN NaN 80 x NaN NaN -1 -1 -1 -1\n",
    )
    .unwrap();

    let mut storage = sample_storage();
    let before = storage.persons().to_vec();

    match import_trc(&path, &mut storage) {
        Err(Error::Parse { line, .. }) => assert_eq!(line, 6),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(storage.persons(), before.as_slice());

    fs::write(&path, "version 9\n0\n").unwrap();
    assert!(matches!(
        import_trc(&path, &mut storage),
        Err(Error::UnsupportedVersion(_))
    ));

    assert!(matches!(
        import_trc(dir.path().join("missing.trc"), &mut storage),
        Err(Error::Io(_))
    ));
}
