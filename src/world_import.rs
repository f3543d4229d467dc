//! Import of real-world trajectories (`persNr frameNr x y z` per line).

use crate::calibration::Calibration;
use crate::error::{Error, Result};
use crate::person_storage::PersonStorage;
use crate::track_person::TrackPerson;
use crate::track_point::{TrackPoint, MAX_QUALITY};
use nalgebra as na;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// Reads world coordinates grouped by person number, in cm. Values are
/// taken as metres unless a `#` header line before the data mentions `cm`.
pub fn read_world_points<R: BufRead>(input: R) -> Result<BTreeMap<i32, BTreeMap<usize, na::Point3<f64>>>> {
    let mut persons: BTreeMap<i32, BTreeMap<usize, na::Point3<f64>>> = BTreeMap::new();
    let mut header = String::new();
    let mut factor = None;

    for (idx, line) in input.lines().enumerate() {
        let line = line?;
        let nr = idx + 1;
        let trimmed = line.trim();

        if trimmed.starts_with('#') {
            header = trimmed.to_string();
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        let factor = *factor.get_or_insert_with(|| {
            if header.contains("cm") {
                1.0
            } else {
                warn!("no header with [cm] found, reading positions as metres");
                100.0
            }
        });

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(Error::parse(nr, format!("expected 5 fields, found {}", fields.len())));
        }

        let person: i32 = fields[0]
            .parse()
            .map_err(|_| Error::parse(nr, format!("invalid person number `{}`", fields[0])))?;
        let frame: usize = fields[1]
            .parse()
            .map_err(|_| Error::parse(nr, format!("invalid frame number `{}`", fields[1])))?;

        let mut xyz = [0.0; 3];
        for (v, s) in xyz.iter_mut().zip(&fields[2..5]) {
            *v = s
                .parse::<f64>()
                .map_err(|_| Error::parse(nr, format!("invalid coordinate `{}`", s)))?
                * factor;
        }

        let frames = persons.entry(person).or_default();
        if frames.insert(frame, na::Point3::from(xyz)).is_some() {
            return Err(Error::DuplicateObservation { person, frame });
        }
    }

    Ok(persons)
}

/// Builds trajectories whose pixels are the projections of the world
/// points. The person height is the z of the first observation.
pub fn world_to_persons(
    data: &BTreeMap<i32, BTreeMap<usize, na::Point3<f64>>>,
    calibration: &Calibration,
) -> Result<Vec<TrackPerson>> {
    let mut persons = Vec::with_capacity(data.len());

    for (nr, frames) in data {
        let mut points = BTreeMap::new();
        for (frame, w) in frames {
            let pixel = calibration.get_image_point(w)?;
            points.insert(*frame, TrackPoint::recognized(pixel, MAX_QUALITY).with_world(*w));
        }

        let mut person = TrackPerson::from_points(*nr, points);
        person.height = frames.values().next().map(|w| w.z);
        persons.push(person);
    }

    Ok(persons)
}

/// Appends the trajectories of a world coordinate file to `storage`,
/// leaving it untouched on error.
pub fn import_world_txt<P: AsRef<Path>>(
    path: P,
    calibration: &Calibration,
    storage: &mut PersonStorage,
) -> Result<usize> {
    let path = path.as_ref();
    if !calibration.is_extrinsic_calibrated() {
        return Err(Error::NotCalibrated);
    }

    let data = read_world_points(BufReader::new(File::open(path)?))?;
    let persons = world_to_persons(&data, calibration)?;

    let n = persons.len();
    for p in persons {
        storage.add_person(p);
    }

    info!("import {} ({} person(s))", path.display(), n);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::tilted_calibration;

    #[test]
    fn metres_by_default() {
        let data = read_world_points("# id frame x y z\n1 0 1.0 2.0 1.8\n".as_bytes()).unwrap();
        let p = data[&1][&0];
        assert!((p.x - 100.0).abs() < 1e-9);
        assert!((p.z - 180.0).abs() < 1e-9);
    }

    #[test]
    fn centimetres_from_header() {
        let data = read_world_points("# id frame x/cm y/cm z/cm\n1 0 100 200 180\n".as_bytes()).unwrap();
        assert_eq!(data[&1][&0], na::Point3::new(100.0, 200.0, 180.0));
    }

    #[test]
    fn duplicate_observation() {
        let text = "# cm\n3 5 0 0 170\n3 5 1 1 170\n";
        let err = read_world_points(text.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::DuplicateObservation { person: 3, frame: 5 }));
    }

    #[test]
    fn projects_back_to_pixels() {
        let calib = tilted_calibration(false);
        let text = "# cm\n4 0 100 0 170\n4 1 110 0 170\n9 0 -50 40 160\n";
        let data = read_world_points(text.as_bytes()).unwrap();
        let persons = world_to_persons(&data, &calib).unwrap();

        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0].height, Some(170.0));

        let tp = persons[0].at(1).unwrap();
        let back = calib.get_3d_point(&tp.pos, 170.0).unwrap();
        assert!((back - na::Point3::new(110.0, 0.0, 170.0)).norm() < 1e-3);
        assert_eq!(tp.world, Some(na::Point3::new(110.0, 0.0, 170.0)));
    }
}
