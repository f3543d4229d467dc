//! Pyramidal template tracking of persons from one frame to the next.

use crate::calibration::Calibration;
use crate::image::{self, GrayImage};
use crate::person_storage::{PersonStorage, Selection};
use crate::roi::Roi;
use crate::track_person::TrackPerson;
use crate::track_point::TrackPoint;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Search window in tenths of the head size.
    #[serde(default = "default_region_scale")]
    pub region_scale: f64,
    #[serde(default = "default_region_levels")]
    pub region_levels: usize,
    /// Retry weak matches with one more pyramid level and a wider window.
    #[serde(default = "default_repeat")]
    pub repeat: bool,
    /// Minimum quality of an accepted match.
    #[serde(default = "default_repeat_quality")]
    pub repeat_quality: i32,
    /// Head size in px when it cannot be derived from the calibration.
    #[serde(default = "default_head_size")]
    pub default_head_size: f64,
}

fn default_region_scale() -> f64 {
    10.0
}

fn default_region_levels() -> usize {
    3
}

fn default_repeat() -> bool {
    true
}

fn default_repeat_quality() -> i32 {
    50
}

fn default_head_size() -> f64 {
    20.0
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            region_scale: default_region_scale(),
            region_levels: default_region_levels(),
            repeat: default_repeat(),
            repeat_quality: default_repeat_quality(),
            default_head_size: default_head_size(),
        }
    }
}

/// Search radius in pixels of pyramid level `levels` for a head of `head` px.
pub fn win_size(head: f64, levels: usize, region_scale: f64) -> f64 {
    (head / (1u64 << levels) as f64 * region_scale / 10.0).max(3.0)
}

/// Everything the tracker reads for one frame.
pub struct TrackInput<'a> {
    pub frame: usize,
    /// Filtered grey image including the border.
    pub image: &'a GrayImage,
    pub border: f64,
    /// Tracking region in storage coordinates.
    pub roi: Option<Roi>,
    pub selection: &'a Selection,
    pub calibration: Option<&'a Calibration>,
    pub default_height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackUpdate {
    pub person: usize,
    pub frame: usize,
    pub point: TrackPoint,
}

/// Image pyramid of a processed frame, kept as reference for the next one.
#[derive(Debug, Clone)]
pub struct FrameState {
    num: usize,
    pyramid: Vec<GrayImage>,
}

#[derive(Debug, Clone, Copy)]
struct Match {
    pos: na::Point2<f64>,
    quality: i32,
}

struct Template {
    data: Vec<f32>,
    half: i32,
    mean: f32,
    norm: f32,
}

impl Template {
    fn extract(img: &GrayImage, c: &na::Point2<f64>, half: i32) -> Option<Self> {
        let mut data = Vec::with_capacity(((2 * half + 1) * (2 * half + 1)) as usize);
        for dy in -half..=half {
            for dx in -half..=half {
                data.push(image::bilinear(img, c.x + dx as f64, c.y + dy as f64));
            }
        }

        let mean = data.iter().sum::<f32>() / data.len() as f32;
        let norm = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>().sqrt();
        if norm < 1e-3 {
            return None;
        }

        Some(Self {
            data,
            half,
            mean,
            norm,
        })
    }

    /// Normalized cross correlation with the patch centred at `c`.
    fn ncc(&self, img: &GrayImage, c: &na::Point2<f64>) -> f32 {
        let half = self.half;
        let mut patch = Vec::with_capacity(self.data.len());
        for dy in -half..=half {
            for dx in -half..=half {
                patch.push(image::bilinear(img, c.x + dx as f64, c.y + dy as f64));
            }
        }

        let mean = patch.iter().sum::<f32>() / patch.len() as f32;
        let mut cross = 0.0;
        let mut norm = 0.0;
        for (p, t) in patch.iter().zip(&self.data) {
            cross += (p - mean) * (t - self.mean);
            norm += (p - mean) * (p - mean);
        }

        if norm < 1e-6 {
            return 0.0;
        }

        cross / (norm.sqrt() * self.norm)
    }
}

#[inline]
fn to_level(p: &na::Point2<f64>, level: usize) -> na::Point2<f64> {
    let s = (1u64 << level) as f64;
    na::Point2::new((p.x + 0.5) / s - 0.5, (p.y + 0.5) / s - 0.5)
}

#[inline]
fn level_down(p: &na::Point2<f64>) -> na::Point2<f64> {
    na::Point2::new(2.0 * p.x + 0.5, 2.0 * p.y + 0.5)
}

fn parabola(l: f32, c: f32, r: f32) -> f64 {
    let denom = l - 2.0 * c + r;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (l - r) / denom).clamp(-0.5, 0.5) as f64
}

pub struct Tracker {
    config: TrackerConfig,
    prev: Option<FrameState>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config, prev: None }
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: TrackerConfig) {
        self.config = config;
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    /// Frame number of the last committed frame.
    pub fn last_frame(&self) -> Option<usize> {
        self.prev.as_ref().map(|p| p.num)
    }

    /// Makes `state` the reference for the next call to [`track`](Self::track).
    pub fn remember(&mut self, state: FrameState) {
        self.prev = Some(state);
    }

    /// Follows every selected person from the previous frame into
    /// `input.frame`. Reads `storage` only; the returned updates are
    /// committed with [`apply`](Self::apply) and the returned state with
    /// [`remember`](Self::remember).
    pub fn track(&self, storage: &PersonStorage, input: &TrackInput<'_>) -> (Vec<TrackUpdate>, FrameState) {
        let cfg = &self.config;
        let pyramid = image::pyramid(input.image, cfg.region_levels + 1);
        let state = FrameState {
            num: input.frame,
            pyramid,
        };

        let prev = match &self.prev {
            Some(prev) if prev.num + 1 == input.frame || input.frame + 1 == prev.num => prev,
            _ => {
                debug!("tracker restarts at frame {}", input.frame);
                return (Vec::new(), state);
            }
        };

        let mut updates = Vec::new();
        for (idx, person) in storage.persons().iter().enumerate() {
            if !input.selection.contains(idx) || person.has(input.frame) {
                continue;
            }

            let Some(from) = person.at(prev.num) else {
                continue;
            };

            let offset = na::Vector2::new(input.border, input.border);
            let start = Self::predict(person, prev.num, input.frame) + offset;
            let head = Self::head_size(cfg, person, &from.pos, input);

            let Some(m) = self.track_point(&prev.pyramid, &state.pyramid, &(from.pos + offset), &start, head)
            else {
                debug!("person {}: no match in frame {}", person.nr(), input.frame);
                continue;
            };

            let pos = m.pos - offset;
            if let Some(roi) = input.roi {
                if !roi.contains(&pos) {
                    debug!("person {}: match {:?} outside tracking region", person.nr(), pos);
                    continue;
                }
            }

            updates.push(TrackUpdate {
                person: idx,
                frame: input.frame,
                point: TrackPoint::tracked(pos, m.quality),
            });
        }

        (updates, state)
    }

    /// Commits tracked points; existing points of higher priority stay.
    pub fn apply(storage: &mut PersonStorage, updates: &[TrackUpdate]) -> usize {
        updates
            .iter()
            .filter(|u| {
                storage
                    .at_mut(u.person)
                    .map_or(false, |p| p.insert(u.frame, u.point))
            })
            .count()
    }

    /// Linear extrapolation from the last two points.
    fn predict(person: &TrackPerson, prev: usize, frame: usize) -> na::Point2<f64> {
        let last = person.at(prev).map(|p| p.pos).unwrap_or_else(na::Point2::origin);
        let before = if frame > prev { prev.checked_sub(1) } else { prev.checked_add(1) };

        match before.and_then(|f| person.at(f)) {
            Some(b) => last + (last - b.pos),
            None => last,
        }
    }

    fn head_size(cfg: &TrackerConfig, person: &TrackPerson, pos: &na::Point2<f64>, input: &TrackInput<'_>) -> f64 {
        let height = person.height.unwrap_or(input.default_height);
        input
            .calibration
            .and_then(|c| c.head_size_px(pos, height).ok())
            .filter(|h| h.is_finite() && *h > 1.0)
            .unwrap_or(cfg.default_head_size)
    }

    fn track_point(
        &self,
        prev: &[GrayImage],
        curr: &[GrayImage],
        from: &na::Point2<f64>,
        start: &na::Point2<f64>,
        head: f64,
    ) -> Option<Match> {
        let cfg = &self.config;
        let first = self.search(prev, curr, from, start, head, cfg.region_levels, 1.0);

        let needs_repeat = first.map_or(true, |m| m.quality < cfg.repeat_quality);
        let best = if cfg.repeat && needs_repeat {
            let second = self.search(prev, curr, from, start, head, cfg.region_levels + 1, 2.0);
            match (first, second) {
                (Some(a), Some(b)) => Some(if b.quality > a.quality { b } else { a }),
                (a, b) => a.or(b),
            }
        } else {
            first
        };

        best.filter(|m| m.quality >= cfg.repeat_quality)
    }

    /// Coarse to fine search; `scale` widens the window at the top level.
    #[allow(clippy::too_many_arguments)]
    fn search(
        &self,
        prev: &[GrayImage],
        curr: &[GrayImage],
        from: &na::Point2<f64>,
        start: &na::Point2<f64>,
        head: f64,
        levels: usize,
        scale: f64,
    ) -> Option<Match> {
        let levels = levels.min(prev.len().min(curr.len()).saturating_sub(1));
        let radius = (win_size(head, levels, self.config.region_scale) * scale).ceil() as i32;

        let mut c = to_level(start, levels);
        let mut score = 0.0;

        for level in (0..=levels).rev() {
            if level < levels {
                c = level_down(&c);
            }

            let half = ((head / 2.0) / (1u64 << level) as f64).round().max(1.0) as i32;
            let tmpl = Template::extract(&prev[level], &to_level(from, level), half)?;
            let r = if level == levels { radius } else { 2 };

            let mut best = (f32::NEG_INFINITY, 0, 0);
            for dy in -r..=r {
                for dx in -r..=r {
                    let p = na::Point2::new(c.x + dx as f64, c.y + dy as f64);
                    let s = tmpl.ncc(&curr[level], &p);
                    if s > best.0 {
                        best = (s, dx, dy);
                    }
                }
            }

            let (s, dx, dy) = best;
            c = na::Point2::new(c.x + dx as f64, c.y + dy as f64);
            score = s;

            if level == 0 {
                let at = |ox: f64, oy: f64| tmpl.ncc(&curr[0], &na::Point2::new(c.x + ox, c.y + oy));
                let sx = parabola(at(-1.0, 0.0), s, at(1.0, 0.0));
                let sy = parabola(at(0.0, -1.0), s, at(0.0, 1.0));
                c = na::Point2::new(c.x + sx, c.y + sy);
            }
        }

        let (rows, cols) = curr[0].dim();
        if c.x < 0.0 || c.y < 0.0 || c.x > (cols - 1) as f64 || c.y > (rows - 1) as f64 {
            return None;
        }

        Some(Match {
            pos: c,
            quality: (100.0 * score.max(0.0)).round() as i32,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image::{Image, Rgb};
    use crate::recognition::RecognitionMethod;

    /// Grey frame with an asymmetric blob centred at `(x, y)`.
    pub(crate) fn blob_frame(x: f64, y: f64) -> GrayImage {
        let mut img = Image::filled(160, 120, Rgb::new(100, 100, 100));
        img.fill_circle(x, y, 10.0, Rgb::new(230, 230, 230));
        img.fill_circle(x + 4.0, y - 3.0, 4.0, Rgb::new(20, 20, 20));
        img.fill_circle(x - 5.0, y + 4.0, 2.0, Rgb::new(60, 60, 60));
        img.to_gray()
    }

    fn input<'a>(frame: usize, image: &'a GrayImage, sel: &'a Selection) -> TrackInput<'a> {
        TrackInput {
            frame,
            image,
            border: 0.0,
            roi: None,
            selection: sel,
            calibration: None,
            default_height: 175.0,
        }
    }

    fn storage_at(x: f64, y: f64) -> PersonStorage {
        let mut s = PersonStorage::default();
        s.add_point(
            TrackPoint::recognized(na::Point2::new(x, y), 100),
            0,
            &Selection::All,
            RecognitionMethod::Color,
        );
        s
    }

    #[test]
    fn win_size_scales_with_levels() {
        assert_eq!(win_size(40.0, 2, 10.0), 10.0);
        assert_eq!(win_size(40.0, 3, 10.0), 5.0);
        assert_eq!(win_size(10.0, 3, 10.0), 3.0);
    }

    #[test]
    fn follows_moving_blob() {
        let sel = Selection::All;
        let mut storage = storage_at(60.0, 50.0);
        let mut tracker = Tracker::new(TrackerConfig::default());

        let f0 = blob_frame(60.0, 50.0);
        let (_, state) = tracker.track(&storage, &input(0, &f0, &sel));
        tracker.remember(state);

        let f1 = blob_frame(64.0, 53.0);
        let (updates, state) = tracker.track(&storage, &input(1, &f1, &sel));
        assert_eq!(updates.len(), 1);
        assert_eq!(Tracker::apply(&mut storage, &updates), 1);
        tracker.remember(state);

        let p = storage.at(0).unwrap().at(1).unwrap();
        assert!((p.pos.x - 64.0).abs() < 1.0 && (p.pos.y - 53.0).abs() < 1.0, "{:?}", p.pos);
        assert!(p.quality >= 80);
        assert!(p.is_tracked_only());
    }

    #[test]
    fn blank_frame_leaves_gap() {
        let sel = Selection::All;
        let storage = storage_at(60.0, 50.0);
        let cfg = TrackerConfig {
            repeat: false,
            ..Default::default()
        };
        let mut tracker = Tracker::new(cfg);

        let f0 = blob_frame(60.0, 50.0);
        let (_, state) = tracker.track(&storage, &input(0, &f0, &sel));
        tracker.remember(state);

        let blank = GrayImage::from_elem((120, 160), 100.0);
        let (updates, _) = tracker.track(&storage, &input(1, &blank, &sel));

        assert!(updates.is_empty());
        assert_eq!(storage.at(0).unwrap().last_frame(), 0);
    }

    #[test]
    fn frame_jump_restarts() {
        let sel = Selection::All;
        let storage = storage_at(60.0, 50.0);
        let mut tracker = Tracker::new(TrackerConfig::default());

        let f0 = blob_frame(60.0, 50.0);
        let (_, state) = tracker.track(&storage, &input(0, &f0, &sel));
        tracker.remember(state);

        let (updates, state) = tracker.track(&storage, &input(5, &f0, &sel));
        assert!(updates.is_empty());
        tracker.remember(state);
        assert_eq!(tracker.last_frame(), Some(5));
    }

    #[test]
    fn outside_roi_is_discarded() {
        let sel = Selection::All;
        let storage = storage_at(60.0, 50.0);
        let mut tracker = Tracker::new(TrackerConfig::default());

        let f0 = blob_frame(60.0, 50.0);
        let (_, state) = tracker.track(&storage, &input(0, &f0, &sel));
        tracker.remember(state);

        let f1 = blob_frame(64.0, 53.0);
        let mut inp = input(1, &f1, &sel);
        inp.roi = Some(Roi::new(0, 0, 62, 120));

        assert!(tracker.track(&storage, &inp).0.is_empty());
    }

    #[test]
    fn tracks_backwards() {
        let sel = Selection::All;
        let mut storage = PersonStorage::default();
        storage.add_point(
            TrackPoint::recognized(na::Point2::new(64.0, 53.0), 100),
            10,
            &Selection::All,
            RecognitionMethod::Color,
        );
        let mut tracker = Tracker::new(TrackerConfig::default());

        let f10 = blob_frame(64.0, 53.0);
        let (_, state) = tracker.track(&storage, &input(10, &f10, &sel));
        tracker.remember(state);

        let f9 = blob_frame(60.0, 50.0);
        let (updates, _) = tracker.track(&storage, &input(9, &f9, &sel));
        Tracker::apply(&mut storage, &updates);

        assert_eq!(storage.at(0).unwrap().first_frame(), 9);
    }
}
