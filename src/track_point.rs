use crate::image::Rgb;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Highest quality a point can carry.
pub const MAX_QUALITY: i32 = 100;

/// Origin of a point. The derived order is the conflict resolution order:
/// `Manual > Recognized > Tracked`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PointSource {
    Tracked,
    Recognized,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub pos: na::Point2<f64>,
    pub quality: i32,
    pub source: PointSource,
    /// World position (cm) from a stereo measurement.
    pub world: Option<na::Point3<f64>>,
    /// Second marker point, e.g. the hat centre of a multi-colour marker.
    pub col_point: Option<na::Point2<f64>>,
    pub color: Option<Rgb>,
    pub marker_id: Option<i32>,
    /// Apparent marker diameter in pixels.
    pub marker_size: Option<f64>,
}

impl TrackPoint {
    pub fn new(pos: na::Point2<f64>, quality: i32, source: PointSource) -> Self {
        let quality = match source {
            PointSource::Manual => MAX_QUALITY,
            _ => quality.clamp(0, MAX_QUALITY),
        };

        Self {
            pos,
            quality,
            source,
            world: None,
            col_point: None,
            color: None,
            marker_id: None,
            marker_size: None,
        }
    }

    #[inline]
    pub fn tracked(pos: na::Point2<f64>, quality: i32) -> Self {
        Self::new(pos, quality, PointSource::Tracked)
    }

    #[inline]
    pub fn recognized(pos: na::Point2<f64>, quality: i32) -> Self {
        Self::new(pos, quality, PointSource::Recognized)
    }

    #[inline]
    pub fn manual(pos: na::Point2<f64>) -> Self {
        Self::new(pos, MAX_QUALITY, PointSource::Manual)
    }

    pub fn with_world(mut self, world: na::Point3<f64>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn with_col_point(mut self, col_point: na::Point2<f64>) -> Self {
        self.col_point = Some(col_point);
        self
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_marker_id(mut self, id: i32) -> Self {
        self.marker_id = Some(id);
        self
    }

    pub fn with_marker_size(mut self, size: f64) -> Self {
        self.marker_size = Some(size);
        self
    }

    /// Whether `self` should replace `other` when both claim the same frame.
    /// A manual point replaces anything, otherwise source then quality decide.
    pub fn supersedes(&self, other: &TrackPoint) -> bool {
        self.source == PointSource::Manual
            || (self.source, self.quality) > (other.source, other.quality)
    }

    #[inline]
    pub fn is_tracked_only(&self) -> bool {
        self.source == PointSource::Tracked
    }

    #[inline]
    pub fn distance(&self, p: &na::Point2<f64>) -> f64 {
        na::distance(&self.pos, p)
    }
}
