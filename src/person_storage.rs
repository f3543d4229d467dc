//! Owner of all trajectories and the structural operations on them.

use crate::recognition::RecognitionMethod;
use crate::roi::Roi;
use crate::track_person::TrackPerson;
use crate::track_point::TrackPoint;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StorageConfig {
    /// Max distance in px between a new point and an existing trajectory.
    #[serde(default = "default_match_radius")]
    pub match_radius: f64,
    /// Max distance in px for picking a trajectory by position.
    #[serde(default = "default_pick_radius")]
    pub pick_radius: f64,
    /// Trailing tracked-only points below this quality are purged.
    #[serde(default = "default_purge_quality")]
    pub purge_quality: i32,
    /// A person whose share of tracked-only points exceeds this is purged.
    #[serde(default = "default_purge_ratio")]
    pub purge_ratio: f64,
    #[serde(default = "default_purge_min_len")]
    pub purge_min_len: usize,
}

fn default_match_radius() -> f64 {
    20.0
}

fn default_pick_radius() -> f64 {
    10.0
}

fn default_purge_quality() -> i32 {
    30
}

fn default_purge_ratio() -> f64 {
    0.8
}

fn default_purge_min_len() -> usize {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            match_radius: default_match_radius(),
            pick_radius: default_pick_radius(),
            purge_quality: default_purge_quality(),
            purge_ratio: default_purge_ratio(),
            purge_min_len: default_purge_min_len(),
        }
    }
}

/// Persons an operation may touch, by 0-based index. An empty `Only` set
/// behaves like `All`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Only(BTreeSet<usize>),
}

impl Selection {
    pub fn only<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Selection::Only(indices.into_iter().collect())
    }

    #[inline]
    pub fn is_restricted(&self) -> bool {
        matches!(self, Selection::Only(set) if !set.is_empty())
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(set) => set.is_empty() || set.contains(&idx),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Points before the current frame.
    Previous,
    /// The whole trajectory.
    Whole,
    /// Points after the current frame.
    Following,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Point stored on the existing person.
    Extended(usize),
    /// A new person was started.
    Created(usize),
    /// Matched the person, but its existing point has priority.
    Rejected(usize),
    /// Not stored: a selection is active and no selected person matched.
    Suppressed,
}

impl AddOutcome {
    pub fn person(&self) -> Option<usize> {
        match *self {
            AddOutcome::Extended(i) | AddOutcome::Created(i) | AddOutcome::Rejected(i) => Some(i),
            AddOutcome::Suppressed => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddPointsReport {
    pub extended: Vec<usize>,
    pub created: Vec<usize>,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub before: usize,
    pub after: usize,
    pub current: usize,
}

impl FrameRange {
    pub fn new(current: usize, before: usize, after: usize) -> Self {
        Self {
            before,
            after,
            current,
        }
    }

    #[inline]
    pub fn first(&self) -> usize {
        self.current.saturating_sub(self.before)
    }

    #[inline]
    pub fn last(&self) -> usize {
        self.current.saturating_add(self.after)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximalPoint {
    pub person: usize,
    pub frame: usize,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Proximity {
    None,
    Unique(ProximalPoint),
    /// More than one person is close, sorted by distance.
    Ambiguous(Vec<ProximalPoint>),
}

/// What [`PersonStorage::purge`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Weak tracked points cut from trajectory ends.
    pub points: usize,
    /// Persons dropped as mostly tracked.
    pub persons: usize,
}

/// Two persons holding nearby points in the same frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    pub first: usize,
    pub second: usize,
    pub frame: usize,
    pub distance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PersonStorage {
    config: StorageConfig,
    persons: Vec<TrackPerson>,
}

impl PersonStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            persons: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StorageConfig) {
        self.config = config;
    }

    #[inline]
    pub fn nb_persons(&self) -> usize {
        self.persons.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    #[inline]
    pub fn persons(&self) -> &[TrackPerson] {
        &self.persons
    }

    #[inline]
    pub fn at(&self, idx: usize) -> Option<&TrackPerson> {
        self.persons.get(idx)
    }

    /// Callers must not leave the person without points.
    #[inline]
    pub(crate) fn at_mut(&mut self, idx: usize) -> Option<&mut TrackPerson> {
        self.persons.get_mut(idx)
    }

    /// Appends `person` unless it has no points. Returns its index.
    pub fn add_person(&mut self, mut person: TrackPerson) -> Option<usize> {
        if person.is_empty() {
            return None;
        }

        person.nr = self.persons.len() as i32 + 1;
        self.persons.push(person);

        Some(self.persons.len() - 1)
    }

    pub fn clear(&mut self) {
        self.persons.clear();
    }

    fn renumber(&mut self) {
        for (i, p) in self.persons.iter_mut().enumerate() {
            p.nr = i as i32 + 1;
        }
    }

    fn remove_person(&mut self, idx: usize) -> TrackPerson {
        let person = self.persons.remove(idx);
        self.renumber();
        person
    }

    fn drop_empty(&mut self) {
        let before = self.persons.len();
        self.persons.retain(|p| !p.is_empty());
        if self.persons.len() != before {
            self.renumber();
        }
    }

    /// Number of persons with a point at `frame`.
    pub fn visible(&self, frame: usize) -> usize {
        self.persons.iter().filter(|p| p.has(frame)).count()
    }

    pub fn largest_last_frame(&self) -> Option<usize> {
        self.persons.iter().map(|p| p.last_frame()).max()
    }

    pub fn smallest_first_frame(&self) -> Option<usize> {
        self.persons.iter().map(|p| p.first_frame()).min()
    }

    pub fn largest_first_frame(&self) -> Option<usize> {
        self.persons.iter().map(|p| p.first_frame()).max()
    }

    /// Closest selected person with a point at `frame` within `radius` of `pos`.
    fn nearest_at(
        &self,
        pos: &na::Point2<f64>,
        frame: usize,
        selection: &Selection,
        radius: f64,
    ) -> Option<usize> {
        self.persons
            .iter()
            .enumerate()
            .filter(|(i, _)| selection.contains(*i))
            .filter_map(|(i, p)| p.at(frame).map(|tp| (i, tp.distance(pos))))
            .filter(|(_, d)| *d <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(i, _)| i)
    }

    /// Distance from `point` to the person's position at `frame` or, when
    /// missing, at an adjacent frame.
    fn match_distance(person: &TrackPerson, point: &TrackPoint, frame: usize) -> Option<f64> {
        let adjacent = [Some(frame), frame.checked_sub(1), frame.checked_add(1)];

        adjacent
            .iter()
            .flatten()
            .find_map(|f| person.at(*f))
            .map(|tp| tp.distance(&point.pos))
    }

    fn compatible(person: &TrackPerson, point: &TrackPoint, method: RecognitionMethod) -> bool {
        if method != RecognitionMethod::Code {
            return true;
        }

        match (person.marker_id, point.marker_id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    fn new_person(&mut self, frame: usize, point: TrackPoint) -> usize {
        let mut person = TrackPerson::new(0, frame, point);
        person.marker_id = point.marker_id;

        self.persons.push(person);
        self.renumber();
        self.persons.len() - 1
    }

    /// Adds a single point, e.g. a manual click or one recognized marker.
    pub fn add_point(
        &mut self,
        point: TrackPoint,
        frame: usize,
        selection: &Selection,
        method: RecognitionMethod,
    ) -> AddOutcome {
        let radius = self.config.match_radius;

        let matched = self
            .persons
            .iter()
            .enumerate()
            .filter(|(i, p)| selection.contains(*i) && Self::compatible(p, &point, method))
            .filter_map(|(i, p)| Self::match_distance(p, &point, frame).map(|d| (i, d)))
            .filter(|(_, d)| *d <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(i, _)| i);

        match matched {
            Some(i) => {
                if self.persons[i].insert(frame, point) {
                    AddOutcome::Extended(i)
                } else {
                    AddOutcome::Rejected(i)
                }
            }
            None if selection.is_restricted() => {
                debug!("point at {:?} suppressed by active selection", point.pos);
                AddOutcome::Suppressed
            }
            None => AddOutcome::Created(self.new_person(frame, point)),
        }
    }

    /// Adds the recognized points of one frame. Candidates are assigned to
    /// nearby trajectories greedily by ascending distance, leftovers start
    /// new persons.
    pub fn add_points(
        &mut self,
        points: &[TrackPoint],
        frame: usize,
        method: RecognitionMethod,
    ) -> AddPointsReport {
        let radius = self.config.match_radius;
        let mut pairs = Vec::new();

        for (c, point) in points.iter().enumerate() {
            for (i, person) in self.persons.iter().enumerate() {
                if !Self::compatible(person, point, method) {
                    continue;
                }

                if let Some(d) = Self::match_distance(person, point, frame) {
                    if d <= radius {
                        pairs.push((d, c, i));
                    }
                }
            }
        }

        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut report = AddPointsReport::default();
        let mut cand_done = vec![false; points.len()];
        let mut pers_done = vec![false; self.persons.len()];

        for (_, c, i) in pairs {
            if cand_done[c] || pers_done[i] {
                continue;
            }

            cand_done[c] = true;
            pers_done[i] = true;

            if self.persons[i].insert(frame, points[c]) {
                report.extended.push(i);
            } else {
                report.rejected += 1;
            }
        }

        for (c, point) in points.iter().enumerate() {
            if cand_done[c] {
                continue;
            }

            // second detection of a head that was already assigned
            if self.nearest_at(&point.pos, frame, &Selection::All, radius).is_some() {
                report.rejected += 1;
                continue;
            }

            report.created.push(self.new_person(frame, *point));
        }

        debug!(
            "frame {}: {} candidates, {} extended, {} created, {} rejected",
            frame,
            points.len(),
            report.extended.len(),
            report.created.len(),
            report.rejected
        );

        report
    }

    /// Deletes part of the trajectory next to `pos` at `frame`. Returns the
    /// index the person had.
    pub fn del_point(
        &mut self,
        pos: &na::Point2<f64>,
        direction: Direction,
        frame: usize,
        selection: &Selection,
    ) -> Option<usize> {
        let idx = self.nearest_at(pos, frame, selection, self.config.pick_radius)?;

        match direction {
            Direction::Previous => {
                self.persons[idx].remove_before(frame);
            }
            Direction::Following => {
                self.persons[idx].remove_after(frame);
            }
            Direction::Whole => {
                self.remove_person(idx);
                return Some(idx);
            }
        }

        self.drop_empty();
        Some(idx)
    }

    /// Applies `direction` relative to `frame` to every person.
    pub fn del_point_all(&mut self, direction: Direction, frame: usize) {
        match direction {
            Direction::Whole => self.persons.clear(),
            Direction::Previous => {
                for p in &mut self.persons {
                    p.remove_before(frame);
                }
            }
            Direction::Following => {
                for p in &mut self.persons {
                    p.remove_after(frame);
                }
            }
        }

        self.drop_empty();
    }

    /// Drops trajectories that never enter `roi`.
    pub fn del_point_roi(&mut self, roi: &Roi) -> usize {
        let before = self.persons.len();
        self.persons
            .retain(|p| p.iter().any(|(_, tp)| roi.contains(&tp.pos)));
        self.renumber();

        before - self.persons.len()
    }

    /// Drops trajectories with at least one point inside `roi`.
    pub fn del_point_inside_roi(&mut self, roi: &Roi) -> usize {
        let before = self.persons.len();
        self.persons
            .retain(|p| !p.iter().any(|(_, tp)| roi.contains(&tp.pos)));
        self.renumber();

        before - self.persons.len()
    }

    /// Cuts the trajectory next to `pos` at `frame`; points at or after
    /// `frame` move to a new person appended at the end.
    pub fn split_person_at(
        &mut self,
        pos: &na::Point2<f64>,
        frame: usize,
        selection: &Selection,
    ) -> Option<usize> {
        let idx = self.nearest_at(pos, frame, selection, self.config.pick_radius)?;
        if self.persons[idx].first_frame() >= frame {
            return None;
        }

        let tail = self.persons[idx].split_off(frame);
        let mut person = TrackPerson::from_points(0, tail);
        person.height = self.persons[idx].height;
        person.marker_id = self.persons[idx].marker_id;

        self.add_person(person)
    }

    /// Moves all points of `other` into `keep`. Returns the number of frames
    /// both held, which the priority rule resolved.
    pub fn join_persons(&mut self, keep: usize, other: usize) -> Option<usize> {
        if keep == other || keep >= self.persons.len() || other >= self.persons.len() {
            return None;
        }

        let removed = self.persons.remove(other);
        let keep = if other < keep { keep - 1 } else { keep };
        let overlap = self.persons[keep].absorb(removed);
        self.renumber();

        Some(overlap)
    }

    /// Prunes speculative tracked-only continuations around `frame`.
    pub fn purge(&mut self, frame: usize) -> PurgeReport {
        let cfg = self.config;
        let mut removed_points = 0;

        for p in &mut self.persons {
            if let Some(last_reco) = p.last_recognized_before(p.last_frame()) {
                let weak: Vec<usize> = p
                    .iter()
                    .filter(|(f, tp)| *f > last_reco && tp.is_tracked_only() && tp.quality < cfg.purge_quality)
                    .map(|(f, _)| f)
                    .collect();

                removed_points += weak.len();
                for f in weak {
                    p.remove(f);
                }
            }
        }

        let before = self.persons.len();
        self.persons.retain(|p| {
            if p.len() <= cfg.purge_min_len || !p.spans(frame) {
                return true;
            }

            let tracked = p.len() - p.recognized_count();
            (tracked as f64 / p.len() as f64) <= cfg.purge_ratio
        });
        let removed_persons = before - self.persons.len();
        self.renumber();

        if removed_points + removed_persons > 0 {
            debug!(
                "purge at frame {}: {} points, {} persons",
                frame, removed_points, removed_persons
            );
        }

        PurgeReport {
            points: removed_points,
            persons: removed_persons,
        }
    }

    /// Selected persons with a point near `pos` inside the frame window.
    pub fn get_proximal_persons(
        &self,
        pos: &na::Point2<f64>,
        selection: &Selection,
        range: FrameRange,
    ) -> Proximity {
        let radius = self.config.pick_radius;
        let mut hits: Vec<ProximalPoint> = self
            .persons
            .iter()
            .enumerate()
            .filter(|(i, _)| selection.contains(*i))
            .filter_map(|(i, p)| {
                p.iter()
                    .filter(|(f, _)| *f >= range.first() && *f <= range.last())
                    .map(|(f, tp)| ProximalPoint {
                        person: i,
                        frame: f,
                        distance: tp.distance(pos),
                    })
                    .filter(|h| h.distance <= radius)
                    .min_by(|a, b| {
                        a.distance.total_cmp(&b.distance).then(
                            a.frame.abs_diff(range.current).cmp(&b.frame.abs_diff(range.current)),
                        )
                    })
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.person.cmp(&b.person)));

        match hits.len() {
            0 => Proximity::None,
            1 => Proximity::Unique(hits[0]),
            _ => Proximity::Ambiguous(hits),
        }
    }

    pub fn set_height(
        &mut self,
        pos: &na::Point2<f64>,
        frame: usize,
        selection: &Selection,
        height: f64,
    ) -> Option<usize> {
        let idx = self.nearest_at(pos, frame, selection, self.config.pick_radius)?;
        self.persons[idx].height = Some(height);
        Some(idx)
    }

    pub fn reset_height(
        &mut self,
        pos: &na::Point2<f64>,
        frame: usize,
        selection: &Selection,
    ) -> Option<usize> {
        let idx = self.nearest_at(pos, frame, selection, self.config.pick_radius)?;
        self.persons[idx].height = None;
        Some(idx)
    }

    pub fn set_comment(
        &mut self,
        pos: &na::Point2<f64>,
        frame: usize,
        selection: &Selection,
        comment: &str,
    ) -> Option<usize> {
        let idx = self.nearest_at(pos, frame, selection, self.config.pick_radius)?;
        self.persons[idx].comment = comment.to_string();
        Some(idx)
    }

    /// Recomputes all heights from stereo world points.
    pub fn recalc_height(&mut self, altitude: f64) -> usize {
        self.persons
            .iter_mut()
            .filter_map(|p| p.recalc_height(altitude))
            .count()
    }

    /// Assigns marker ids keyed by person number.
    pub fn apply_marker_ids(&mut self, ids: &HashMap<i32, i32>) -> usize {
        let mut n = 0;
        for p in &mut self.persons {
            if let Some(id) = ids.get(&p.nr) {
                p.marker_id = Some(*id);
                n += 1;
            }
        }

        info!("assigned {} marker ids", n);
        n
    }

    /// Assigns heights keyed by marker id.
    pub fn apply_heights_by_marker(&mut self, heights: &HashMap<i32, f64>) -> usize {
        let mut n = 0;
        for p in &mut self.persons {
            if let Some(h) = p.marker_id.and_then(|id| heights.get(&id)) {
                p.height = Some(*h);
                n += 1;
            }
        }

        info!("assigned {} heights from marker ids", n);
        n
    }

    /// Pairs of persons that hold points closer than the match radius in
    /// the same frame, i.e. probably the same pedestrian twice.
    pub fn overlaps(&self) -> Vec<Overlap> {
        let radius = self.config.match_radius;
        let mut found = Vec::new();

        for (i, a) in self.persons.iter().enumerate() {
            for (j, b) in self.persons.iter().enumerate().skip(i + 1) {
                if a.last_frame() < b.first_frame() || b.last_frame() < a.first_frame() {
                    continue;
                }

                let hit = a
                    .iter()
                    .filter_map(|(f, pa)| b.at(f).map(|pb| (f, pa.distance(&pb.pos))))
                    .find(|(_, d)| *d <= radius);

                if let Some((frame, distance)) = hit {
                    found.push(Overlap {
                        first: i,
                        second: j,
                        frame,
                        distance,
                    });
                }
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_point::PointSource;

    fn pt(x: f64, y: f64) -> TrackPoint {
        TrackPoint::recognized(na::Point2::new(x, y), 80)
    }

    fn storage_with(persons: &[(f64, f64, std::ops::Range<usize>)]) -> PersonStorage {
        let mut s = PersonStorage::new(StorageConfig::default());
        for (x, y, frames) in persons {
            let mut p = TrackPerson::empty(0);
            for f in frames.clone() {
                p.replace(f, pt(*x + f as f64, *y));
            }
            s.add_person(p);
        }
        s
    }

    fn assert_invariants(s: &PersonStorage) {
        for (i, p) in s.persons().iter().enumerate() {
            assert_eq!(p.nr(), i as i32 + 1);
            assert!(!p.is_empty());
        }
        if s.nb_persons() > 0 {
            assert!(s.largest_last_frame().unwrap() >= s.smallest_first_frame().unwrap());
        }
    }

    #[test]
    fn add_point_extends_nearest() {
        let mut s = storage_with(&[(100.0, 100.0, 0..5), (300.0, 100.0, 0..5)]);

        let out = s.add_point(pt(305.0, 102.0), 5, &Selection::All, RecognitionMethod::Color);
        assert_eq!(out, AddOutcome::Extended(1));
        assert_eq!(s.at(1).unwrap().last_frame(), 5);

        let out = s.add_point(pt(600.0, 600.0), 5, &Selection::All, RecognitionMethod::Color);
        assert_eq!(out, AddOutcome::Created(2));
        assert_invariants(&s);
    }

    #[test]
    fn add_point_suppressed_by_selection() {
        let mut s = storage_with(&[(100.0, 100.0, 0..5)]);
        let out = s.add_point(pt(500.0, 500.0), 3, &Selection::only([0]), RecognitionMethod::Color);

        assert_eq!(out, AddOutcome::Suppressed);
        assert_eq!(s.nb_persons(), 1);
    }

    #[test]
    fn manual_point_stored_with_full_quality() {
        let mut s = storage_with(&[(100.0, 100.0, 0..5)]);
        let manual = TrackPoint::new(na::Point2::new(103.0, 101.0), 110, PointSource::Manual);

        let out = s.add_point(manual, 3, &Selection::All, RecognitionMethod::Color);
        assert_eq!(out, AddOutcome::Extended(0));

        let stored = s.at(0).unwrap().at(3).unwrap();
        assert_eq!(stored.pos, manual.pos);
        assert_eq!(stored.quality, 100);
    }

    #[test]
    fn code_markers_keep_identity() {
        let mut s = PersonStorage::default();
        s.add_point(pt(100.0, 100.0).with_marker_id(4), 0, &Selection::All, RecognitionMethod::Code);

        let out = s.add_point(pt(102.0, 100.0).with_marker_id(7), 1, &Selection::All, RecognitionMethod::Code);
        assert_eq!(out, AddOutcome::Created(1));
    }

    #[test]
    fn add_points_greedy() {
        let mut s = storage_with(&[(100.0, 100.0, 0..10), (140.0, 100.0, 0..10)]);
        // persons are at x = 109 and x = 149 in frame 9
        let report = s.add_points(
            &[pt(147.0, 100.0), pt(112.0, 100.0), pt(900.0, 900.0)],
            10,
            RecognitionMethod::Color,
        );

        assert_eq!(report.extended, vec![1, 0]);
        assert_eq!(report.created, vec![2]);
        assert!((s.at(0).unwrap().at(10).unwrap().pos.x - 112.0).abs() < 1e-9);
        assert_invariants(&s);
    }

    #[test]
    fn delete_directions() {
        let mut s = storage_with(&[(100.0, 100.0, 0..10)]);
        let pos = na::Point2::new(105.0, 100.0);

        assert_eq!(s.del_point(&pos, Direction::Following, 5, &Selection::All), Some(0));
        assert_eq!(s.at(0).unwrap().frames().collect::<Vec<_>>(), (0..6).collect::<Vec<_>>());

        s.del_point(&pos, Direction::Previous, 5, &Selection::All);
        assert_eq!(s.at(0).unwrap().first_frame(), 5);

        s.del_point(&pos, Direction::Whole, 5, &Selection::All);
        assert_eq!(s.nb_persons(), 0);
    }

    #[test]
    fn delete_all_following_drops_later_persons() {
        let mut s = storage_with(&[(100.0, 100.0, 0..10), (400.0, 100.0, 20..30)]);
        s.del_point_all(Direction::Following, 5);

        assert_eq!(s.nb_persons(), 1);
        assert_eq!(s.at(0).unwrap().last_frame(), 5);
        assert_invariants(&s);
    }

    #[test]
    fn roi_deletion() {
        let roi = Roi::new(0, 0, 200, 200);
        let mut s = storage_with(&[(100.0, 100.0, 0..3), (500.0, 500.0, 0..3)]);
        assert_eq!(s.del_point_roi(&roi), 1);
        assert_eq!(s.at(0).unwrap().at(0).unwrap().pos.x, 100.0);

        let mut s = storage_with(&[(100.0, 100.0, 0..3), (500.0, 500.0, 0..3)]);
        assert_eq!(s.del_point_inside_roi(&roi), 1);
        assert_eq!(s.at(0).unwrap().at(0).unwrap().pos.x, 500.0);
        assert_invariants(&s);
    }

    #[test]
    fn split_then_join_restores_points() {
        let mut s = storage_with(&[(100.0, 100.0, 0..10), (500.0, 100.0, 0..10)]);
        let orig = s.at(0).unwrap().clone();

        let new = s
            .split_person_at(&na::Point2::new(104.0, 100.0), 4, &Selection::All)
            .unwrap();
        assert_eq!(new, 2);
        assert_eq!(s.at(0).unwrap().last_frame(), 3);
        assert_eq!(s.at(2).unwrap().first_frame(), 4);

        assert_eq!(s.join_persons(0, 2), Some(0));
        let joined: Vec<_> = s.at(0).unwrap().iter().map(|(f, p)| (f, p.pos)).collect();
        let expected: Vec<_> = orig.iter().map(|(f, p)| (f, p.pos)).collect();
        assert_eq!(joined, expected);
        assert_invariants(&s);
    }

    #[test]
    fn split_at_first_frame_is_noop() {
        let mut s = storage_with(&[(100.0, 100.0, 3..6)]);
        assert_eq!(s.split_person_at(&na::Point2::new(103.0, 100.0), 3, &Selection::All), None);
        assert_eq!(s.nb_persons(), 1);
    }

    #[test]
    fn purge_removes_speculative_tracks() {
        let mut s = PersonStorage::default();
        let mut ghost = TrackPerson::empty(0);
        ghost.replace(0, pt(50.0, 50.0));
        for f in 1..15 {
            ghost.replace(f, TrackPoint::tracked(na::Point2::new(50.0, 50.0), 90));
        }
        s.add_person(ghost);

        let mut real = TrackPerson::empty(0);
        for f in 0..15 {
            real.replace(f, pt(300.0, 50.0));
        }
        real.replace(15, TrackPoint::tracked(na::Point2::new(300.0, 50.0), 10));
        s.add_person(real);

        assert_eq!(
            s.purge(10),
            PurgeReport {
                points: 1,
                persons: 1
            }
        );
        assert_eq!(s.nb_persons(), 1);
        assert_eq!(s.at(0).unwrap().last_frame(), 14);
        assert_invariants(&s);
    }

    #[test]
    fn proximity_is_deterministic() {
        let s = storage_with(&[(100.0, 100.0, 0..10), (104.0, 100.0, 0..10), (400.0, 100.0, 0..10)]);
        let range = FrameRange::new(5, 0, 0);

        match s.get_proximal_persons(&na::Point2::new(109.0, 100.0), &Selection::All, range) {
            Proximity::Ambiguous(hits) => {
                assert_eq!(hits.iter().map(|h| h.person).collect::<Vec<_>>(), vec![1, 0]);
            }
            other => panic!("unexpected {:?}", other),
        }

        match s.get_proximal_persons(&na::Point2::new(109.0, 100.0), &Selection::only([0]), range) {
            Proximity::Unique(h) => assert_eq!((h.person, h.frame), (0, 5)),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            s.get_proximal_persons(&na::Point2::new(900.0, 900.0), &Selection::All, range),
            Proximity::None
        );
    }

    #[test]
    fn overlaps_are_reported() {
        let s = storage_with(&[(100.0, 100.0, 0..5), (105.0, 100.0, 3..8), (400.0, 0.0, 0..5)]);
        let found = s.overlaps();

        assert_eq!(found.len(), 1);
        assert_eq!((found[0].first, found[0].second, found[0].frame), (0, 1, 3));
    }
}
