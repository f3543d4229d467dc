use crate::image::Rgb;
use crate::track_point::TrackPoint;
use nalgebra as na;

/// A marker observation: centre `(x, y)` and `(w, h)` of its bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub quality: i32,
    pub marker_id: Option<i32>,
    pub color: Option<Rgb>,
    pub col_point: Option<na::Point2<f64>>,
    pub world: Option<na::Point3<f64>>,
}

impl Candidate {
    pub fn new(x: f64, y: f64, w: f64, h: f64, quality: i32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            quality,
            marker_id: None,
            color: None,
            col_point: None,
            world: None,
        }
    }

    pub fn iou(&self, other: &Candidate) -> f64 {
        let b1_area = (self.w + 1.) * (self.h + 1.);
        let (xmin, xmax, ymin, ymax) = (self.xmin(), self.xmax(), self.ymin(), self.ymax());

        let b2_area = (other.w + 1.) * (other.h + 1.);

        let i_xmin = xmin.max(other.xmin());
        let i_xmax = xmax.min(other.xmax());
        let i_ymin = ymin.max(other.ymin());
        let i_ymax = ymax.min(other.ymax());
        let i_area = (i_xmax - i_xmin + 1.).max(0.) * (i_ymax - i_ymin + 1.).max(0.);

        i_area / (b1_area + b2_area - i_area)
    }

    #[inline(always)]
    pub fn center(&self) -> na::Point2<f64> {
        na::Point2::new(self.x, self.y)
    }

    #[inline(always)]
    pub fn xmax(&self) -> f64 {
        self.x + self.w / 2.
    }

    #[inline(always)]
    pub fn ymax(&self) -> f64 {
        self.y + self.h / 2.
    }

    #[inline(always)]
    pub fn xmin(&self) -> f64 {
        self.x - self.w / 2.
    }

    #[inline(always)]
    pub fn ymin(&self) -> f64 {
        self.y - self.h / 2.
    }

    /// Recognized point shifted by `offset` (e.g. the border size).
    pub fn to_track_point(&self, offset: na::Vector2<f64>) -> TrackPoint {
        let mut p = TrackPoint::recognized(self.center() - offset, self.quality)
            .with_marker_size(self.w.max(self.h));

        p.col_point = self.col_point.map(|c| c - offset);
        p.color = self.color;
        p.marker_id = self.marker_id;
        p.world = self.world;

        p
    }
}

/// Keeps the best candidates among those overlapping by more than
/// `iou_threshold`, highest quality first.
pub fn non_maximum_suppression(dets: &mut Vec<Candidate>, iou_threshold: f64) {
    if dets.len() < 2 {
        return;
    }

    dets.sort_by(|a, b| b.quality.cmp(&a.quality));

    let mut retain = vec![true; dets.len()];
    for idx in 0..dets.len() - 1 {
        if retain[idx] {
            for r in idx + 1..dets.len() {
                if retain[r] && dets[idx].iou(&dets[r]) > iou_threshold {
                    retain[r] = false;
                }
            }
        }
    }

    let mut keep = retain.into_iter();
    dets.retain(|_| keep.next().unwrap_or(false));
}
