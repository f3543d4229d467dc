use crate::image::Rgb;
use crate::track_point::{PointSource, TrackPoint};
use std::collections::BTreeMap;

/// Trajectory of one pedestrian, at most one point per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPerson {
    pub(crate) nr: i32,
    /// Height in cm, if known.
    pub height: Option<f64>,
    pub comment: String,
    /// Mean colour of the marker over `col_count` samples.
    pub color: Option<Rgb>,
    pub col_count: i32,
    pub marker_id: Option<i32>,
    points: BTreeMap<usize, TrackPoint>,
}

impl TrackPerson {
    pub fn new(nr: i32, frame: usize, point: TrackPoint) -> Self {
        let mut person = Self::empty(nr);
        person.replace(frame, point);
        person
    }

    pub(crate) fn empty(nr: i32) -> Self {
        Self {
            nr,
            height: None,
            comment: String::new(),
            color: None,
            col_count: 0,
            marker_id: None,
            points: BTreeMap::new(),
        }
    }

    pub(crate) fn from_points(nr: i32, points: BTreeMap<usize, TrackPoint>) -> Self {
        let mut person = Self::empty(nr);
        for (frame, point) in points {
            person.replace(frame, point);
        }

        person
    }

    /// 1-based number, kept equal to the storage index + 1.
    #[inline]
    pub fn nr(&self) -> i32 {
        self.nr
    }

    #[inline]
    pub fn first_frame(&self) -> usize {
        self.points.keys().next().copied().unwrap_or(0)
    }

    #[inline]
    pub fn last_frame(&self) -> usize {
        self.points.keys().next_back().copied().unwrap_or(0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn at(&self, frame: usize) -> Option<&TrackPoint> {
        self.points.get(&frame)
    }

    #[inline]
    pub fn at_mut(&mut self, frame: usize) -> Option<&mut TrackPoint> {
        self.points.get_mut(&frame)
    }

    #[inline]
    pub fn has(&self, frame: usize) -> bool {
        self.points.contains_key(&frame)
    }

    #[inline]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, &TrackPoint)> {
        self.points.iter().map(|(f, p)| (*f, p))
    }

    #[inline]
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.points.keys().copied()
    }

    /// Whether `frame` lies within `[first_frame, last_frame]`.
    #[inline]
    pub fn spans(&self, frame: usize) -> bool {
        !self.is_empty() && self.first_frame() <= frame && frame <= self.last_frame()
    }

    /// Stores `point` at `frame` unless an existing point there takes priority.
    pub fn insert(&mut self, frame: usize, point: TrackPoint) -> bool {
        match self.points.get(&frame) {
            Some(existing) if !point.supersedes(existing) => false,
            _ => {
                self.replace(frame, point);
                true
            }
        }
    }

    /// Stores `point` at `frame` regardless of priority.
    pub fn replace(&mut self, frame: usize, point: TrackPoint) -> Option<TrackPoint> {
        if let Some(c) = point.color {
            if point.source != PointSource::Tracked {
                self.add_color(c);
            }
        }

        self.points.insert(frame, point)
    }

    pub fn remove(&mut self, frame: usize) -> Option<TrackPoint> {
        self.points.remove(&frame)
    }

    /// Removes all points strictly before `frame`.
    pub fn remove_before(&mut self, frame: usize) -> usize {
        let kept = self.points.split_off(&frame);
        let removed = self.points.len();
        self.points = kept;
        removed
    }

    /// Removes all points strictly after `frame`.
    pub fn remove_after(&mut self, frame: usize) -> usize {
        self.points.split_off(&(frame + 1)).len()
    }

    /// Removes all points in `from..=to`.
    pub fn remove_between(&mut self, from: usize, to: usize) -> usize {
        let before = self.points.len();
        self.points.retain(|f, _| *f < from || *f > to);
        before - self.points.len()
    }

    /// Moves every point at or after `frame` out of this person.
    pub fn split_off(&mut self, frame: usize) -> BTreeMap<usize, TrackPoint> {
        self.points.split_off(&frame)
    }

    /// Point level union with `other`. Where both hold a point, the priority
    /// rule decides. Returns the number of frames present in both.
    pub fn absorb(&mut self, other: TrackPerson) -> usize {
        let mut overlap = 0;
        for (frame, point) in other.points {
            if self.has(frame) {
                overlap += 1;
            }
            self.insert(frame, point);
        }

        if self.height.is_none() {
            self.height = other.height;
        }
        if self.marker_id.is_none() {
            self.marker_id = other.marker_id;
        }
        if self.comment.is_empty() {
            self.comment = other.comment;
        }

        overlap
    }

    /// Existing frame closest to `frame`, the earlier one on ties.
    pub fn nearest_frame(&self, frame: usize) -> Option<usize> {
        let before = self.points.range(..=frame).next_back().map(|(f, _)| *f);
        let after = self.points.range(frame..).next().map(|(f, _)| *f);

        match (before, after) {
            (Some(b), Some(a)) => Some(if frame - b <= a - frame { b } else { a }),
            (b, a) => b.or(a),
        }
    }

    /// Last recognized or manual frame at or before `frame`.
    pub fn last_recognized_before(&self, frame: usize) -> Option<usize> {
        self.points
            .range(..=frame)
            .rev()
            .find(|(_, p)| !p.is_tracked_only())
            .map(|(f, _)| *f)
    }

    pub fn recognized_count(&self) -> usize {
        self.points.values().filter(|p| !p.is_tracked_only()).count()
    }

    /// Folds a colour sample into the running mean.
    pub fn add_color(&mut self, c: Rgb) {
        let n = self.col_count.max(0) as u32;
        self.color = Some(match self.color {
            Some(prev) if n > 0 => {
                let mix = |a: u8, b: u8| ((a as u32 * n + b as u32) / (n + 1)) as u8;
                Rgb::new(mix(prev.r, c.r), mix(prev.g, c.g), mix(prev.b, c.b))
            }
            _ => c,
        });
        self.col_count += 1;
    }

    /// Sets the height from the median z of the stereo world points. Points
    /// outside `(0, altitude)` are ignored. Returns the new height.
    pub fn recalc_height(&mut self, altitude: f64) -> Option<f64> {
        let mut zs: Vec<f64> = self
            .points
            .values()
            .filter_map(|p| p.world.map(|w| w.z))
            .filter(|z| *z > 0.0 && *z < altitude)
            .collect();

        if zs.is_empty() {
            return None;
        }

        zs.sort_by(|a, b| a.total_cmp(b));
        let mid = zs.len() / 2;
        let h = if zs.len() % 2 == 0 {
            0.5 * (zs[mid - 1] + zs[mid])
        } else {
            zs[mid]
        };

        self.height = Some(h);
        Some(h)
    }
}
