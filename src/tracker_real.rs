//! Conversion of pixel trajectories into real-world trajectories.

use crate::calibration::{Calibration, HEAD_SIZE};
use crate::error::{Error, Result};
use crate::export::{ExportHeader, ExportWriter};
use crate::math;
use crate::missing_frames::MissingFrames;
use crate::person_storage::{PersonStorage, Selection};
use crate::pipeline::CancelToken;
use crate::track_person::TrackPerson;
use crate::track_point::TrackPoint;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ExportOptions {
    /// Prefer the stereo world point for the height.
    pub use_stereo: bool,
    /// Derive the height per frame from the apparent marker size.
    pub alternate_height: bool,
    /// Real marker diameter in cm used by `alternate_height`.
    pub marker_diameter: f64,
    /// Height in cm of persons without one.
    pub default_height: f64,
    pub elim_points: bool,
    pub elim_quality: i32,
    /// Largest plausible movement between consecutive frames in cm.
    pub max_step_cm: f64,
    pub elim_trajectories: bool,
    pub min_trajectory_len: usize,
    /// Share of implausible steps above which a trajectory is dropped.
    pub max_erratic_share: f64,
    pub smooth: bool,
    pub smooth_window: usize,
    pub view_direction: bool,
    pub angle_of_view: bool,
    pub marker_id: bool,
    pub use_missing_frames: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            use_stereo: false,
            alternate_height: false,
            marker_diameter: HEAD_SIZE,
            default_height: 175.0,
            elim_points: false,
            elim_quality: 20,
            max_step_cm: 50.0,
            elim_trajectories: false,
            min_trajectory_len: 10,
            max_erratic_share: 0.3,
            smooth: false,
            smooth_window: 5,
            view_direction: false,
            angle_of_view: false,
            marker_id: false,
            use_missing_frames: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealPoint {
    /// Nominal frame number.
    pub frame: usize,
    /// World position in cm.
    pub pos: na::Point3<f64>,
    pub pixel: na::Point2<f64>,
    pub quality: i32,
    pub height: f64,
    /// Unit direction in the ground plane.
    pub view_dir: Option<na::Vector2<f64>>,
    pub angle_of_view: Option<f64>,
    pub marker_id: Option<i32>,
    col_world: Option<na::Point3<f64>>,
    video_frame: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealPerson {
    pub nr: i32,
    pub height: Option<f64>,
    pub comment: String,
    pub points: Vec<RealPoint>,
}

impl RealPerson {
    pub fn first_frame(&self) -> Option<usize> {
        self.points.first().map(|p| p.frame)
    }

    pub fn last_frame(&self) -> Option<usize> {
        self.points.last().map(|p| p.frame)
    }
}

/// Real-world trajectories, recomputed from the storage on demand.
#[derive(Debug, Clone, Default)]
pub struct TrackerReal {
    persons: Vec<RealPerson>,
}

impl TrackerReal {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn persons(&self) -> &[RealPerson] {
        &self.persons
    }

    /// Every point with its person, persons ascending, frames ascending.
    pub fn records(&self) -> impl Iterator<Item = (&RealPerson, &RealPoint)> {
        self.persons
            .iter()
            .flat_map(|p| p.points.iter().map(move |pt| (p, pt)))
    }

    /// Bounding box of all points.
    pub fn bounds(&self) -> Option<(na::Point3<f64>, na::Point3<f64>)> {
        let mut it = self.records().map(|(_, p)| p.pos);
        let first = it.next()?;

        Some(it.fold((first, first), |(lo, hi), p| {
            (lo.coords.inf(&p.coords).into(), hi.coords.sup(&p.coords).into())
        }))
    }

    /// Rebuilds the real-world trajectories of the selected persons and
    /// returns how many were kept.
    pub fn calculate(
        &mut self,
        storage: &PersonStorage,
        calibration: &Calibration,
        missing: &MissingFrames,
        options: &ExportOptions,
        selection: &Selection,
    ) -> Result<usize> {
        if !calibration.is_extrinsic_calibrated() {
            return Err(Error::NotCalibrated);
        }

        let mut persons = Vec::new();
        for (idx, person) in storage.persons().iter().enumerate() {
            if !selection.contains(idx) {
                continue;
            }

            let mut points = Vec::with_capacity(person.len());
            for (frame, tp) in person.iter() {
                if options.elim_points && tp.quality < options.elim_quality {
                    continue;
                }

                match Self::project(person, frame, tp, calibration, options) {
                    Ok(p) => points.push(p),
                    Err(Error::Geometry(e)) => debug!("person {} frame {}: {}", person.nr(), frame, e),
                    Err(e) => return Err(e),
                }
            }

            if options.elim_points {
                Self::eliminate_spikes(&mut points, options.max_step_cm);
            }

            if options.elim_trajectories && Self::implausible(&points, options) {
                debug!("person {}: trajectory eliminated", person.nr());
                continue;
            }

            if options.smooth {
                Self::smooth(&mut points, options.smooth_window);
            }

            if options.view_direction {
                Self::view_directions(&mut points);
            }

            for p in &mut points {
                if options.angle_of_view {
                    p.angle_of_view = calibration.angle_of_view(&p.pos).ok();
                }
                if options.use_missing_frames {
                    p.frame = missing.nominal_frame(p.video_frame);
                }
            }

            if points.is_empty() {
                continue;
            }

            persons.push(RealPerson {
                nr: person.nr(),
                height: person.height,
                comment: person.comment.clone(),
                points,
            });
        }

        self.persons = persons;
        info!(
            "real-world trajectories: {} of {} persons",
            self.persons.len(),
            storage.nb_persons()
        );

        Ok(self.persons.len())
    }

    fn height_of(
        person: &TrackPerson,
        tp: &TrackPoint,
        calibration: &Calibration,
        options: &ExportOptions,
    ) -> f64 {
        if options.use_stereo {
            if let Some(w) = tp.world {
                return w.z;
            }
        }

        if options.alternate_height {
            let alt = tp.marker_size.filter(|s| *s > 0.0).and_then(|size| {
                let dist = calibration.intrinsic.fx * options.marker_diameter / size;
                calibration.point_at_distance(&tp.pos, dist).ok()
            });
            if let Some(p) = alt {
                return p.z;
            }
        }

        person.height.unwrap_or(options.default_height)
    }

    fn project(
        person: &TrackPerson,
        frame: usize,
        tp: &TrackPoint,
        calibration: &Calibration,
        options: &ExportOptions,
    ) -> Result<RealPoint> {
        let height = Self::height_of(person, tp, calibration, options);
        let pos = calibration.get_3d_point(&tp.pos, height)?;
        let col_world = tp
            .col_point
            .and_then(|c| calibration.get_3d_point(&c, height).ok());

        Ok(RealPoint {
            frame,
            pos,
            pixel: tp.pos,
            quality: tp.quality,
            height,
            view_dir: None,
            angle_of_view: None,
            marker_id: if options.marker_id {
                tp.marker_id.or(person.marker_id)
            } else {
                None
            },
            col_world,
            video_frame: frame,
        })
    }

    #[inline]
    fn ground_dist(a: &RealPoint, b: &RealPoint) -> f64 {
        (a.pos.xy() - b.pos.xy()).norm()
    }

    /// Drops points that jump away from both neighbours.
    fn eliminate_spikes(points: &mut Vec<RealPoint>, max_step: f64) {
        if points.len() < 3 {
            return;
        }

        let spikes: Vec<bool> = (0..points.len())
            .map(|i| {
                if i == 0 || i + 1 == points.len() {
                    return false;
                }
                let (prev, cur, next) = (&points[i - 1], &points[i], &points[i + 1]);
                let lim = |a: &RealPoint, b: &RealPoint| max_step * a.video_frame.abs_diff(b.video_frame) as f64;

                Self::ground_dist(prev, cur) > lim(prev, cur)
                    && Self::ground_dist(cur, next) > lim(cur, next)
                    && Self::ground_dist(prev, next) <= lim(prev, next)
            })
            .collect();

        let mut it = spikes.into_iter();
        points.retain(|_| !it.next().unwrap_or(false));
    }

    fn implausible(points: &[RealPoint], options: &ExportOptions) -> bool {
        if points.len() < options.min_trajectory_len {
            return true;
        }

        let steps = points.len() - 1;
        if steps == 0 {
            return false;
        }

        let erratic = points
            .windows(2)
            .filter(|w| {
                Self::ground_dist(&w[0], &w[1])
                    > options.max_step_cm * w[0].video_frame.abs_diff(w[1].video_frame) as f64
            })
            .count();

        erratic as f64 / steps as f64 > options.max_erratic_share
    }

    /// Centred moving average within runs of consecutive frames.
    fn smooth(points: &mut [RealPoint], window: usize) {
        let mut start = 0;
        while start < points.len() {
            let mut end = start + 1;
            while end < points.len() && points[end].video_frame == points[end - 1].video_frame + 1 {
                end += 1;
            }

            let seg = &mut points[start..end];
            for axis in 0..2 {
                let values: Vec<f64> = seg.iter().map(|p| p.pos[axis]).collect();
                for (p, v) in seg.iter_mut().zip(math::moving_average(&values, window)) {
                    p.pos[axis] = v;
                }
            }

            start = end;
        }
    }

    /// From the marker's second point when present, otherwise from the
    /// movement between the neighbouring points.
    fn view_directions(points: &mut [RealPoint]) {
        let n = points.len();
        let dirs: Vec<Option<na::Vector2<f64>>> = (0..n)
            .map(|i| {
                let p = &points[i];
                let d = match p.col_world {
                    Some(c) => (p.pos - c).xy(),
                    None => {
                        let a = &points[i.saturating_sub(1)];
                        let b = &points[(i + 1).min(n - 1)];
                        (b.pos - a.pos).xy()
                    }
                };

                let norm = d.norm();
                (norm > 1e-9).then(|| d / norm)
            })
            .collect();

        for (p, d) in points.iter_mut().zip(dirs) {
            p.view_dir = d;
        }
    }

    /// Hands every record to `writer`; checks `cancel` before each one.
    pub fn export(
        &self,
        writer: &mut dyn ExportWriter,
        fps: f64,
        project: Option<&str>,
        options: &ExportOptions,
        cancel: &CancelToken,
    ) -> Result<usize> {
        writer.begin(&ExportHeader {
            fps,
            project,
            options,
            persons: &self.persons,
        })?;

        let mut n = 0;
        for (person, point) in self.records() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            writer.record(person, point)?;
            n += 1;
        }

        writer.finish()?;
        info!("exported {} records of {} persons", n, self.persons.len());

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{ExtrinsicParams, IntrinsicParams};
    use crate::export::TxtWriter;
    use crate::missing_frames::MissingFrame;
    use crate::recognition::RecognitionMethod;

    /// Camera straight above the origin at 1000 cm.
    fn overhead() -> Calibration {
        let rot = na::Rotation3::from_axis_angle(&na::Vector3::x_axis(), std::f64::consts::PI);
        let ext = ExtrinsicParams::from_center(&rot, &na::Point3::new(0.0, 0.0, 1000.0));
        Calibration::new(IntrinsicParams::pinhole(1000.0, 1000.0, 500.0, 500.0), Some(ext))
    }

    /// A person walking along +x in image space, 2 px per frame.
    fn walker(frames: std::ops::Range<usize>) -> PersonStorage {
        let mut s = PersonStorage::default();
        let mut person = TrackPerson::empty(0);
        for f in frames {
            let pos = na::Point2::new(500.0 + 2.0 * f as f64, 500.0);
            person.replace(f, TrackPoint::recognized(pos, 90));
        }
        person.height = Some(180.0);
        s.add_person(person);
        s
    }

    #[test]
    fn needs_extrinsics() {
        let mut real = TrackerReal::new();
        let res = real.calculate(
            &walker(0..5),
            &Calibration::default(),
            &MissingFrames::default(),
            &ExportOptions::default(),
            &Selection::All,
        );

        assert!(matches!(res, Err(Error::NotCalibrated)));
    }

    #[test]
    fn person_height_and_order() {
        let mut storage = walker(0..5);
        storage.add_point(
            TrackPoint::recognized(na::Point2::new(100.0, 100.0), 90),
            2,
            &Selection::All,
            RecognitionMethod::Color,
        );

        let mut real = TrackerReal::new();
        let n = real
            .calculate(
                &storage,
                &overhead(),
                &MissingFrames::default(),
                &ExportOptions::default(),
                &Selection::All,
            )
            .unwrap();

        assert_eq!(n, 2);
        let records: Vec<_> = real.records().map(|(p, pt)| (p.nr, pt.frame)).collect();
        assert_eq!(records, vec![(1, 0), (1, 1), (1, 2), (1, 3), (1, 4), (2, 2)]);

        let first = &real.persons()[0].points[0];
        assert!((first.pos.z - 180.0).abs() < 1e-6);
        assert!(first.pos.x.abs() < 1e-6 && first.pos.y.abs() < 1e-6);

        let second = &real.persons()[1].points[0];
        assert!((second.height - 175.0).abs() < 1e-9);
    }

    #[test]
    fn missing_frames_shift_numbers() {
        let mut real = TrackerReal::new();
        let missing = MissingFrames::new(vec![MissingFrame { num: 3, count: 2 }]);
        real.calculate(
            &walker(0..5),
            &overhead(),
            &missing,
            &ExportOptions::default(),
            &Selection::All,
        )
        .unwrap();

        let frames: Vec<_> = real.records().map(|(_, p)| p.frame).collect();
        assert_eq!(frames, vec![0, 1, 2, 5, 6]);
    }

    #[test]
    fn spikes_and_short_tracks_eliminated() {
        let mut storage = walker(0..12);
        storage.at_mut(0).unwrap().replace(6, TrackPoint::recognized(na::Point2::new(900.0, 900.0), 90));
        let mut short = TrackPerson::empty(0);
        short.replace(0, TrackPoint::recognized(na::Point2::new(100.0, 100.0), 90));
        storage.add_person(short);

        let options = ExportOptions {
            elim_points: true,
            elim_trajectories: true,
            min_trajectory_len: 5,
            ..Default::default()
        };

        let mut real = TrackerReal::new();
        real.calculate(&storage, &overhead(), &MissingFrames::default(), &options, &Selection::All)
            .unwrap();

        assert_eq!(real.persons().len(), 1);
        let frames: Vec<_> = real.persons()[0].points.iter().map(|p| p.frame).collect();
        assert!(!frames.contains(&6));
        assert_eq!(frames.len(), 11);
    }

    #[test]
    fn smoothing_and_direction() {
        let mut storage = walker(0..10);
        storage.at_mut(0).unwrap().replace(5, TrackPoint::recognized(na::Point2::new(510.0, 504.0), 90));

        let options = ExportOptions {
            smooth: true,
            smooth_window: 3,
            view_direction: true,
            angle_of_view: true,
            ..Default::default()
        };

        let mut real = TrackerReal::new();
        real.calculate(&storage, &overhead(), &MissingFrames::default(), &options, &Selection::All)
            .unwrap();

        let pts = &real.persons()[0].points;
        let raw_y = overhead().get_3d_point(&na::Point2::new(510.0, 504.0), 180.0).unwrap().y;
        assert!(pts[5].pos.y.abs() < raw_y.abs());

        // moving along +x in the image, i.e. +x in the world
        let d = pts[2].view_dir.unwrap();
        assert!(d.x > 0.99);
        assert!(pts[0].angle_of_view.unwrap() < 1.0);
    }

    #[test]
    fn export_text() {
        let mut real = TrackerReal::new();
        let options = ExportOptions {
            marker_id: true,
            ..Default::default()
        };
        real.calculate(&walker(0..3), &overhead(), &MissingFrames::default(), &options, &Selection::All)
            .unwrap();

        let mut writer = TxtWriter::new(Vec::new());
        let n = real
            .export(&mut writer, 25.0, None, &options, &CancelToken::new())
            .unwrap();
        assert_eq!(n, 3);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "# framerate: 25 fps");
        assert_eq!(lines[1], "# id frame x/cm y/cm z/cm markerID");
        let cols: Vec<_> = lines[2].split_whitespace().collect();
        assert_eq!(cols[..2], ["1", "0"]);
        assert_eq!(cols[4..], ["180.0000", "-1"]);
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn export_can_be_cancelled() {
        let mut real = TrackerReal::new();
        real.calculate(
            &walker(0..3),
            &overhead(),
            &MissingFrames::default(),
            &ExportOptions::default(),
            &Selection::All,
        )
        .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut writer = TxtWriter::new(Vec::new());
        let res = real.export(&mut writer, 25.0, None, &ExportOptions::default(), &cancel);

        assert!(matches!(res, Err(Error::Cancelled)));
    }
}
