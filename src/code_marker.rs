//! Square fiducials with a black border and a `bits x bits` payload,
//! decoded against a dictionary in any of the four orientations.

use crate::blob::{self, Blob};
use crate::candidate::{self, Candidate};
use crate::color_marker::{default_max_area, default_min_area, default_nms_iou, head_area};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::image::{self, GrayImage, Image, Rgb};
use crate::recognition::{RecognitionContext, RecognitionMethod, Recognizer};
use crate::roi::Roi;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

/// 4x4 payloads, pairwise at least 4 bits apart in every orientation.
pub const DEFAULT_DICTIONARY: [u64; 16] = [
    0xa5cd, 0x269e, 0xa6a3, 0x0c5c, 0x128b, 0xd23f, 0x892f, 0x5d9d, 0x0ed9, 0xe8e2, 0x81e7, 0x36f6,
    0x0999, 0x1600, 0x6f03, 0x11e2,
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CodeMarkerConfig {
    #[serde(default = "default_dictionary")]
    pub dictionary: Vec<u64>,
    /// Payload cells per side.
    #[serde(default = "default_bits")]
    pub bits: usize,
    #[serde(default = "default_max_hamming")]
    pub max_hamming: u32,
    /// Grey value below which a pixel may belong to a marker.
    #[serde(default = "default_dark_threshold")]
    pub dark_threshold: f32,
    /// Minimum grey difference between black and white cells.
    #[serde(default = "default_min_contrast")]
    pub min_contrast: f32,
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    #[serde(default = "default_max_area")]
    pub max_area: f64,
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f64,
}

fn default_dictionary() -> Vec<u64> {
    DEFAULT_DICTIONARY.to_vec()
}

fn default_bits() -> usize {
    4
}

fn default_max_hamming() -> u32 {
    1
}

fn default_dark_threshold() -> f32 {
    100.0
}

fn default_min_contrast() -> f32 {
    40.0
}

impl Default for CodeMarkerConfig {
    fn default() -> Self {
        Self {
            dictionary: default_dictionary(),
            bits: default_bits(),
            max_hamming: default_max_hamming(),
            dark_threshold: default_dark_threshold(),
            min_contrast: default_min_contrast(),
            min_area: default_min_area(),
            max_area: default_max_area(),
            nms_iou: default_nms_iou(),
        }
    }
}

#[inline]
fn bit_index(bits: usize, r: usize, c: usize) -> usize {
    bits * bits - 1 - (r * bits + c)
}

#[inline]
fn cell(code: u64, bits: usize, r: usize, c: usize) -> bool {
    (code >> bit_index(bits, r, c)) & 1 == 1
}

/// Quarter turn clockwise of a `bits x bits` payload.
pub fn rotate_cw(code: u64, bits: usize) -> u64 {
    let mut out = 0;
    for r in 0..bits {
        for c in 0..bits {
            if cell(code, bits, bits - 1 - c, r) {
                out |= 1 << bit_index(bits, r, c);
            }
        }
    }
    out
}

impl CodeMarkerConfig {
    fn validate(&self) -> Result<()> {
        if self.bits == 0 || self.bits > 8 {
            return Err(Error::InvalidConfig(format!("unsupported code size {}", self.bits)));
        }
        Ok(())
    }

    /// Draws marker `id` with its top-left corner at `(left, top)`, turned
    /// clockwise by `quarter_turns`. White payload cells, black border.
    pub fn draw_marker(
        &self,
        image: &mut Image,
        id: usize,
        left: u32,
        top: u32,
        cell_px: u32,
        quarter_turns: usize,
    ) -> Result<()> {
        self.validate()?;
        let mut code = *self
            .dictionary
            .get(id)
            .ok_or_else(|| Error::InvalidConfig(format!("marker id {} not in dictionary", id)))?;

        for _ in 0..quarter_turns % 4 {
            code = rotate_cw(code, self.bits);
        }

        let n = self.bits + 2;
        for i in 0..n {
            for j in 0..n {
                let inner = i > 0 && j > 0 && i <= self.bits && j <= self.bits;
                let white = inner && cell(code, self.bits, i - 1, j - 1);
                let c = if white { Rgb::new(255, 255, 255) } else { Rgb::new(0, 0, 0) };

                let roi = Roi::new(
                    (left + j as u32 * cell_px) as i32,
                    (top + i as u32 * cell_px) as i32,
                    cell_px as i32,
                    cell_px as i32,
                );
                image.fill_rect(roi, c);
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decoded {
    id: usize,
    hamming: u32,
    /// Clockwise quarter turns of the marker in the image.
    turns: usize,
}

pub struct CodeMarker {
    config: CodeMarkerConfig,
}

impl CodeMarker {
    pub fn new(config: CodeMarkerConfig) -> Self {
        Self { config }
    }

    fn sample(gray: &GrayImage, corners: &[na::Point2<f64>; 4], n: usize) -> Vec<f32> {
        let [tl, tr, br, bl] = corners;
        let mut out = Vec::with_capacity(n * n);

        for i in 0..n {
            for j in 0..n {
                let (u, v) = ((j as f64 + 0.5) / n as f64, (i as f64 + 0.5) / n as f64);
                let p = tl.coords * ((1.0 - u) * (1.0 - v))
                    + tr.coords * (u * (1.0 - v))
                    + br.coords * (u * v)
                    + bl.coords * ((1.0 - u) * v);

                out.push(image::bilinear(gray, p.x - 0.5, p.y - 0.5));
            }
        }

        out
    }

    fn decode(&self, gray: &GrayImage, blob: &Blob) -> Option<(Decoded, [na::Point2<f64>; 4])> {
        let cfg = &self.config;
        let n = cfg.bits + 2;
        let corners = blob.extreme_corners();
        let samples = Self::sample(gray, &corners, n);

        let lo = samples.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if hi - lo < cfg.min_contrast {
            return None;
        }

        let thr = 0.5 * (lo + hi);
        let white = |i: usize, j: usize| samples[i * n + j] >= thr;

        for k in 0..n {
            if white(0, k) || white(n - 1, k) || white(k, 0) || white(k, n - 1) {
                return None;
            }
        }

        let mut code = 0u64;
        for r in 0..cfg.bits {
            for c in 0..cfg.bits {
                if white(r + 1, c + 1) {
                    code |= 1 << bit_index(cfg.bits, r, c);
                }
            }
        }

        let mut best: Option<Decoded> = None;
        let mut rotated = code;
        for k in 0..4 {
            for (id, entry) in cfg.dictionary.iter().enumerate() {
                let hamming = (rotated ^ entry).count_ones();
                let better = best.map_or(true, |b| hamming < b.hamming);
                if better {
                    best = Some(Decoded {
                        id,
                        hamming,
                        // undoing `k` clockwise turns means the marker sits
                        // turned by `4 - k`
                        turns: (4 - k) % 4,
                    });
                }
            }
            rotated = rotate_cw(rotated, cfg.bits);
        }

        best.filter(|b| b.hamming <= cfg.max_hamming)
            .map(|b| (b, corners))
    }
}

impl Recognizer for CodeMarker {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Code
    }

    fn recognize(&mut self, image: &Image, roi: Roi, ctx: &RecognitionContext<'_>) -> Result<Frame> {
        self.config.validate()?;

        let cfg = &self.config;
        let area = head_area(ctx.head_size);
        let gray = image.crop(roi).to_gray();
        let offset = na::Vector2::new(roi.x as f64, roi.y as f64);

        let mut found = Vec::new();
        for b in blob::connected_components(&blob::mask_dark(&gray, cfg.dark_threshold)) {
            let a = (b.width() * b.height()) as f64;
            if a < cfg.min_area * area || a > cfg.max_area * area || b.aspect() < 0.5 {
                continue;
            }

            let Some((dec, corners)) = self.decode(&gray, &b) else {
                continue;
            };

            let center = na::Point2::from(corners.iter().map(|c| c.coords).sum::<na::Vector2<f64>>() / 4.0);
            // back edge midpoint, so that `col_point -> pos` is the marker's up direction
            let back = na::center(&corners[(dec.turns + 2) % 4], &corners[(dec.turns + 3) % 4]);

            let pos = center + offset;
            let mut c = Candidate::new(
                pos.x,
                pos.y,
                b.width() as f64,
                b.height() as f64,
                100 - 10 * dec.hamming as i32,
            );
            c.marker_id = Some(dec.id as i32);
            c.col_point = Some(back + offset);

            debug!("code marker {} at {:?}, hamming {}", dec.id, pos, dec.hamming);
            found.push(c);
        }

        candidate::non_maximum_suppression(&mut found, cfg.nms_iou);

        Ok(Frame::new(ctx.frame, found))
    }
}
