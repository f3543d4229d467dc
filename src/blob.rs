//! Colour / darkness segmentation shared by the marker recognizers.

use crate::image::{GrayImage, HsvImage, Image, Rgb};
use nalgebra as na;
use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};
use std::collections::VecDeque;

pub type Mask = Array2<bool>;

/// HSV box in OpenCV 8-bit units. With `inverse_hue` the hue interval is
/// taken outside `[h_min, h_max]`, which covers reds wrapping around 0.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvRange {
    pub h_min: u8,
    pub h_max: u8,
    pub s_min: u8,
    pub s_max: u8,
    pub v_min: u8,
    pub v_max: u8,
    #[serde(default)]
    pub inverse_hue: bool,
}

impl HsvRange {
    pub const fn new(h: (u8, u8), s: (u8, u8), v: (u8, u8)) -> Self {
        Self {
            h_min: h.0,
            h_max: h.1,
            s_min: s.0,
            s_max: s.1,
            v_min: v.0,
            v_max: v.1,
            inverse_hue: false,
        }
    }

    pub const fn inverted(mut self) -> Self {
        self.inverse_hue = true;
        self
    }

    #[inline]
    pub fn contains(&self, h: u8, s: u8, v: u8) -> bool {
        let hue = if self.inverse_hue {
            h <= self.h_min || h >= self.h_max
        } else {
            self.h_min <= h && h <= self.h_max
        };

        hue && (self.s_min..=self.s_max).contains(&s) && (self.v_min..=self.v_max).contains(&v)
    }
}

impl Default for HsvRange {
    fn default() -> Self {
        // saturated green
        Self::new((45, 75), (100, 255), (80, 255))
    }
}

pub fn mask_hsv(hsv: &HsvImage, range: &HsvRange) -> Mask {
    let (rows, cols, _) = hsv.dim();
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        range.contains(hsv[[y, x, 0]], hsv[[y, x, 1]], hsv[[y, x, 2]])
    })
}

pub fn mask_dark(gray: &GrayImage, threshold: f32) -> Mask {
    gray.mapv(|v| v < threshold)
}

/// Clears mask pixels outside the foreground; `foreground` is indexed with
/// the `(x, y)` offset of `mask` inside the full image.
pub fn apply_foreground(mask: &mut Mask, foreground: &Mask, offset: (usize, usize)) {
    let (ox, oy) = offset;
    for ((y, x), m) in mask.indexed_iter_mut() {
        if *m && !foreground.get((y + oy, x + ox)).copied().unwrap_or(false) {
            *m = false;
        }
    }
}

fn morph(mask: &Mask, radius: usize, erode: bool) -> Mask {
    if radius == 0 {
        return mask.clone();
    }

    let (rows, cols) = mask.dim();
    let r = radius as isize;

    Array2::from_shape_fn((rows, cols), |(y, x)| {
        let mut hit = erode;
        'outer: for dy in -r..=r {
            for dx in -r..=r {
                let (yy, xx) = (y as isize + dy, x as isize + dx);
                let v = yy >= 0
                    && xx >= 0
                    && (yy as usize) < rows
                    && (xx as usize) < cols
                    && mask[[yy as usize, xx as usize]];

                if erode && !v {
                    hit = false;
                    break 'outer;
                }
                if !erode && v {
                    hit = true;
                    break 'outer;
                }
            }
        }
        hit
    })
}

/// Erosion followed by dilation with a square kernel of `radius`.
pub fn open(mask: &Mask, radius: usize) -> Mask {
    morph(&morph(mask, radius, true), radius, false)
}

/// 4-connected region of a mask, in local `(x, y)` pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub area: usize,
    pub centroid: na::Point2<f64>,
    pub xmin: usize,
    pub ymin: usize,
    pub xmax: usize,
    pub ymax: usize,
    pub pixels: Vec<(usize, usize)>,
}

impl Blob {
    #[inline]
    pub fn width(&self) -> usize {
        self.xmax - self.xmin + 1
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.ymax - self.ymin + 1
    }

    /// Share of the bounding box covered by the blob.
    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        self.area as f64 / (self.width() * self.height()) as f64
    }

    /// Shorter over longer bounding box side.
    #[inline]
    pub fn aspect(&self) -> f64 {
        let (w, h) = (self.width() as f64, self.height() as f64);
        w.min(h) / w.max(h)
    }

    #[inline]
    pub fn bbox_contains(&self, p: &na::Point2<f64>) -> bool {
        p.x >= self.xmin as f64
            && p.x <= self.xmax as f64 + 1.0
            && p.y >= self.ymin as f64
            && p.y <= self.ymax as f64 + 1.0
    }

    /// Top-left, top-right, bottom-right and bottom-left extreme pixels.
    pub fn extreme_corners(&self) -> [na::Point2<f64>; 4] {
        let mut tl = (i64::MAX, (0, 0));
        let mut br = (i64::MIN, (0, 0));
        let mut tr = (i64::MIN, (0, 0));
        let mut bl = (i64::MAX, (0, 0));

        for &(x, y) in &self.pixels {
            let (s, d) = (x as i64 + y as i64, x as i64 - y as i64);
            if s < tl.0 {
                tl = (s, (x, y));
            }
            if s > br.0 {
                br = (s, (x, y));
            }
            if d > tr.0 {
                tr = (d, (x, y));
            }
            if d < bl.0 {
                bl = (d, (x, y));
            }
        }

        // pixel centres, pushed out to the outer pixel corner
        let pt = |(x, y): (usize, usize), dx: f64, dy: f64| na::Point2::new(x as f64 + dx, y as f64 + dy);
        [
            pt(tl.1, 0.0, 0.0),
            pt(tr.1, 1.0, 0.0),
            pt(br.1, 1.0, 1.0),
            pt(bl.1, 0.0, 1.0),
        ]
    }

    pub fn mean_color(&self, image: &Image) -> Rgb {
        if self.pixels.is_empty() {
            return Rgb::new(0, 0, 0);
        }

        let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
        for &(x, y) in &self.pixels {
            let c = image.pixel(x as u32, y as u32);
            r += c.r as u64;
            g += c.g as u64;
            b += c.b as u64;
        }

        let n = self.pixels.len() as u64;
        Rgb::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
    }
}

/// Labels the 4-connected regions of `mask` in raster order of their
/// first pixel.
pub fn connected_components(mask: &Mask) -> Vec<Blob> {
    let (rows, cols) = mask.dim();
    let mut seen = Array2::<bool>::from_elem((rows, cols), false);
    let mut blobs = Vec::new();
    let mut queue = VecDeque::new();

    for y in 0..rows {
        for x in 0..cols {
            if !mask[[y, x]] || seen[[y, x]] {
                continue;
            }

            seen[[y, x]] = true;
            queue.push_back((x, y));

            let mut pixels = Vec::new();
            let (mut sx, mut sy) = (0.0, 0.0);
            let (mut xmin, mut ymin, mut xmax, mut ymax) = (x, y, x, y);

            while let Some((px, py)) = queue.pop_front() {
                pixels.push((px, py));
                sx += px as f64;
                sy += py as f64;
                xmin = xmin.min(px);
                xmax = xmax.max(px);
                ymin = ymin.min(py);
                ymax = ymax.max(py);

                let neighbours = [
                    (px.wrapping_sub(1), py),
                    (px + 1, py),
                    (px, py.wrapping_sub(1)),
                    (px, py + 1),
                ];

                for (nx, ny) in neighbours {
                    if nx < cols && ny < rows && mask[[ny, nx]] && !seen[[ny, nx]] {
                        seen[[ny, nx]] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }

            let n = pixels.len() as f64;
            blobs.push(Blob {
                area: pixels.len(),
                // +0.5 for the pixel centre
                centroid: na::Point2::new(sx / n + 0.5, sy / n + 0.5),
                xmin,
                ymin,
                xmax,
                ymax,
                pixels,
            });
        }
    }

    blobs
}
