//! Disparity from a rectified stereo pair, used for head heights and
//! markerless recognition.

use crate::blob;
use crate::candidate::{self, Candidate};
use crate::color_marker::head_area;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::image::{GrayImage, Image};
use crate::person_storage::PersonStorage;
use crate::recognition::{RecognitionContext, RecognitionMethod, Recognizer};
use crate::roi::Roi;
use nalgebra as na;
use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StereoParams {
    pub focal_px: f64,
    pub baseline_cm: f64,
    pub cx: f64,
    pub cy: f64,
    pub min_disparity: usize,
    pub max_disparity: usize,
    /// Odd side length of the matching block.
    pub block_size: usize,
    /// Height of the camera above the ground in cm.
    pub camera_altitude: f64,
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            focal_px: 1000.0,
            baseline_cm: 10.0,
            cx: 320.0,
            cy: 240.0,
            min_disparity: 0,
            max_disparity: 64,
            block_size: 7,
            camera_altitude: 500.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisparityMap {
    params: StereoParams,
    /// Disparity in px, NaN where no match was found.
    data: Array2<f32>,
}

impl DisparityMap {
    pub fn from_array(params: StereoParams, data: Array2<f32>) -> Self {
        Self { params, data }
    }

    /// SAD block matching along the rows of a rectified pair. Matches that
    /// fail the left/right consistency check (occlusions) are left invalid.
    pub fn compute(left: &GrayImage, right: &GrayImage, params: StereoParams) -> Result<Self> {
        if left.dim() != right.dim() {
            return Err(Error::InvalidConfig(format!(
                "stereo images differ in size: {:?} vs {:?}",
                left.dim(),
                right.dim()
            )));
        }
        if params.block_size % 2 == 0 || params.min_disparity > params.max_disparity {
            return Err(Error::InvalidConfig(
                "stereo block size must be odd and the disparity range non-empty".to_string(),
            ));
        }

        let mut data = Self::block_match(left, right, &params, true);
        let back = Self::block_match(right, left, &params, false);
        let cols = data.ncols() as isize;

        for ((y, x), d) in data.indexed_iter_mut() {
            if !d.is_finite() {
                continue;
            }

            let xr = x as isize - d.round() as isize;
            let consistent = xr >= 0 && xr < cols && {
                let b = back[[y, xr as usize]];
                b.is_finite() && (b - *d).abs() <= 1.0
            };

            if !consistent {
                *d = f32::NAN;
            }
        }

        Ok(Self { params, data })
    }

    /// Disparities with `reference` as the base image. The left image finds
    /// its match at `x - d`, the right one at `x + d`.
    fn block_match(
        reference: &GrayImage,
        other: &GrayImage,
        params: &StereoParams,
        left_is_ref: bool,
    ) -> Array2<f32> {
        let (rows, cols) = reference.dim();
        let half = params.block_size / 2;
        let mut data = Array2::from_elem((rows, cols), f32::NAN);
        let mut costs = vec![f32::INFINITY; params.max_disparity + 1];

        for y in half..rows.saturating_sub(half) {
            for x in half..cols.saturating_sub(half) {
                costs.iter_mut().for_each(|c| *c = f32::INFINITY);

                let reach = if left_is_ref {
                    x - half
                } else {
                    cols - 1 - half - x
                };

                for d in params.min_disparity..=params.max_disparity.min(reach) {
                    let xo = if left_is_ref { x - d } else { x + d };
                    let mut sad = 0.0;
                    for dy in 0..params.block_size {
                        for dx in 0..params.block_size {
                            let yy = y + dy - half;
                            sad += (reference[[yy, x + dx - half]] - other[[yy, xo + dx - half]]).abs();
                        }
                    }
                    costs[d] = sad;
                }

                let best = (params.min_disparity..=params.max_disparity)
                    .filter(|d| costs[*d].is_finite())
                    .min_by(|a, b| costs[*a].total_cmp(&costs[*b]));

                if let Some(d) = best {
                    data[[y, x]] = d as f32 + Self::subpixel(&costs, d);
                }
            }
        }

        data
    }

    fn subpixel(costs: &[f32], d: usize) -> f32 {
        if d == 0 || d + 1 >= costs.len() {
            return 0.0;
        }

        let (l, c, r) = (costs[d - 1], costs[d], costs[d + 1]);
        let denom = l - 2.0 * c + r;
        if !l.is_finite() || !r.is_finite() || denom <= f32::EPSILON {
            return 0.0;
        }

        (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
    }

    #[inline]
    pub fn params(&self) -> &StereoParams {
        &self.params
    }

    #[inline]
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Median of the valid disparities within `radius` px of `(x, y)`.
    pub fn disparity_at(&self, x: f64, y: f64, radius: usize) -> Option<f32> {
        let (rows, cols) = self.data.dim();
        let (xi, yi) = (x.round() as isize, y.round() as isize);
        let r = radius as isize;

        let mut valid: Vec<f32> = (yi - r..=yi + r)
            .flat_map(|yy| (xi - r..=xi + r).map(move |xx| (yy, xx)))
            .filter(|(yy, xx)| *yy >= 0 && *xx >= 0 && (*yy as usize) < rows && (*xx as usize) < cols)
            .map(|(yy, xx)| self.data[[yy as usize, xx as usize]])
            .filter(|d| d.is_finite() && *d > 0.0)
            .collect();

        if valid.is_empty() {
            return None;
        }

        valid.sort_by(|a, b| a.total_cmp(b));
        Some(valid[valid.len() / 2])
    }

    /// Lateral camera coordinates and height above ground (cm) of the
    /// surface seen at pixel `(x, y)`.
    pub fn world_point(&self, x: f64, y: f64) -> Option<na::Point3<f64>> {
        let d = self.disparity_at(x, y, 2)? as f64;
        let p = &self.params;
        let z = p.focal_px * p.baseline_cm / d;

        Some(na::Point3::new(
            (x - p.cx) * z / p.focal_px,
            (y - p.cy) * z / p.focal_px,
            p.camera_altitude - z,
        ))
    }

    /// Height above ground per pixel, NaN where unknown.
    pub fn height_map(&self) -> Array2<f32> {
        let p = &self.params;
        let fb = (p.focal_px * p.baseline_cm) as f32;
        let altitude = p.camera_altitude as f32;

        self.data
            .mapv(|d| if d.is_finite() && d > 0.0 { altitude - fb / d } else { f32::NAN })
    }
}

impl PersonStorage {
    /// Stores the stereo world point of every person present at `frame`.
    pub fn calc_world_positions(&mut self, frame: usize, disparity: &DisparityMap) -> usize {
        let mut n = 0;
        for idx in 0..self.nb_persons() {
            if let Some(tp) = self.at_mut(idx).and_then(|p| p.at_mut(frame)) {
                tp.world = disparity.world_point(tp.pos.x, tp.pos.y);
                n += tp.world.is_some() as usize;
            }
        }

        n
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StereoMarkerConfig {
    /// Elevations below this height (cm) are not heads.
    #[serde(default = "default_min_height")]
    pub min_height: f64,
    #[serde(default = "default_max_height")]
    pub max_height: f64,
    /// Depth of the head cap in cm measured down from the top.
    #[serde(default = "default_top_band")]
    pub top_band: f64,
    #[serde(default = "default_min_area")]
    pub min_area: f64,
}

fn default_min_height() -> f64 {
    100.0
}

fn default_max_height() -> f64 {
    250.0
}

fn default_top_band() -> f64 {
    15.0
}

fn default_min_area() -> f64 {
    0.2
}

impl Default for StereoMarkerConfig {
    fn default() -> Self {
        Self {
            min_height: default_min_height(),
            max_height: default_max_height(),
            top_band: default_top_band(),
            min_area: default_min_area(),
        }
    }
}

/// Markerless recognition: every elevated region of the height map yields
/// one head at the centre of its topmost band.
pub struct StereoMarker {
    config: StereoMarkerConfig,
}

impl StereoMarker {
    pub fn new(config: StereoMarkerConfig) -> Self {
        Self { config }
    }
}

impl Recognizer for StereoMarker {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Stereo
    }

    fn recognize(&mut self, _image: &Image, roi: Roi, ctx: &RecognitionContext<'_>) -> Result<Frame> {
        let disparity = ctx.disparity.ok_or_else(|| {
            Error::InvalidConfig("markerless recognition needs a disparity map".to_string())
        })?;

        let cfg = &self.config;
        let heights = disparity.height_map();
        let (rows, cols) = heights.dim();
        let border = ctx.border as f64;
        let roi = roi
            .translated(-(ctx.border as i32), -(ctx.border as i32))
            .clip_to(cols as u32, rows as u32, false);

        let mask = Array2::from_shape_fn((roi.height as usize, roi.width as usize), |(y, x)| {
            let h = heights[[y + roi.y as usize, x + roi.x as usize]] as f64;
            h.is_finite() && h >= cfg.min_height && h <= cfg.max_height
        });

        let min_area = cfg.min_area * head_area(ctx.head_size);
        let mut found = Vec::new();

        for b in blob::connected_components(&mask) {
            if (b.area as f64) < min_area {
                continue;
            }

            let h_at = |(x, y): (usize, usize)| heights[[y + roi.y as usize, x + roi.x as usize]] as f64;
            let top = b.pixels.iter().map(|p| h_at(*p)).fold(f64::NEG_INFINITY, f64::max);

            let cap: Vec<_> = b
                .pixels
                .iter()
                .filter(|p| h_at(**p) >= top - cfg.top_band)
                .collect();

            let n = cap.len() as f64;
            let cx = cap.iter().map(|(x, _)| *x as f64 + 0.5).sum::<f64>() / n + roi.x as f64;
            let cy = cap.iter().map(|(_, y)| *y as f64 + 0.5).sum::<f64>() / n + roi.y as f64;

            let quality = (100.0 * (b.area as f64 / head_area(ctx.head_size)).min(1.0)).round() as i32;
            let mut c = Candidate::new(cx + border, cy + border, ctx.head_size, ctx.head_size, quality);
            c.world = disparity.world_point(cx, cy);

            debug!("stereo head at ({:.1}, {:.1}), top {:.0} cm", cx, cy, top);
            found.push(c);
        }

        candidate::non_maximum_suppression(&mut found, 0.3);

        Ok(Frame::new(ctx.frame, found))
    }
}
