use crate::roi::Roi;
use ndarray::prelude::*;
use serde_derive::{Deserialize, Serialize};

/// 8 bit colour as used for marker signatures.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// OpenCV style 8 bit HSV: hue in `0..180`, saturation and value in `0..=255`.
    pub fn to_hsv(self) -> (u8, u8, u8) {
        let (r, g, b) = (self.r as f32, self.g as f32, self.b as f32);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let v = max;
        let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

        let h = if delta <= f32::EPSILON {
            0.0
        } else if (max - r).abs() <= f32::EPSILON {
            60.0 * ((g - b) / delta)
        } else if (max - g).abs() <= f32::EPSILON {
            60.0 * ((b - r) / delta) + 120.0
        } else {
            60.0 * ((r - g) / delta) + 240.0
        };
        let h = if h < 0.0 { h + 360.0 } else { h };

        (((h / 2.0).round() as u32 % 180) as u8, s.round() as u8, v as u8)
    }
}

/// Colour frame stored as `rows x cols x 3` in BGR order.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array3<u8>,
}

/// Single channel plane with float precision.
pub type GrayImage = Array2<f32>;

/// `rows x cols x 3` plane with H, S and V channels.
pub type HsvImage = Array3<u8>;

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: Array3::zeros((height as usize, width as usize, 3)),
        }
    }

    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        let mut img = Self::new(width, height);
        img.fill_rect(Roi::full(width, height), color);
        img
    }

    pub fn from_array(data: Array3<u8>) -> Self {
        Self { data }
    }

    #[inline]
    pub fn array(&self) -> &Array3<u8> {
        &self.data
    }

    #[inline]
    pub fn array_mut(&mut self) -> &mut Array3<u8> {
        &mut self.data
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.data.shape()[1] as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.data.shape()[0] as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Rgb {
        let (row, col) = (y as usize, x as usize);

        Rgb::new(
            self.data[[row, col, 2]],
            self.data[[row, col, 1]],
            self.data[[row, col, 0]],
        )
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, c: Rgb) {
        let (row, col) = (y as usize, x as usize);

        self.data[[row, col, 0]] = c.b;
        self.data[[row, col, 1]] = c.g;
        self.data[[row, col, 2]] = c.r;
    }

    pub fn fill_rect(&mut self, roi: Roi, c: Rgb) {
        let r = roi.clip_to(self.width(), self.height(), false);

        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                self.set_pixel(x as u32, y as u32, c);
            }
        }
    }

    pub fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, c: Rgb) {
        let r = Roi::new(
            (cx - radius).floor() as i32,
            (cy - radius).floor() as i32,
            (2.0 * radius).ceil() as i32 + 2,
            (2.0 * radius).ceil() as i32 + 2,
        )
        .clip_to(self.width(), self.height(), false);

        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(x as u32, y as u32, c);
                }
            }
        }
    }

    /// Luma with BT.601 weights.
    pub fn to_gray(&self) -> GrayImage {
        let (rows, cols) = (self.height() as usize, self.width() as usize);

        Array2::from_shape_fn((rows, cols), |(y, x)| {
            0.114 * self.data[[y, x, 0]] as f32
                + 0.587 * self.data[[y, x, 1]] as f32
                + 0.299 * self.data[[y, x, 2]] as f32
        })
    }

    pub fn to_hsv(&self) -> HsvImage {
        let (rows, cols) = (self.height() as usize, self.width() as usize);
        let mut hsv = Array3::zeros((rows, cols, 3));

        for y in 0..rows {
            for x in 0..cols {
                let (h, s, v) = self.pixel(x as u32, y as u32).to_hsv();
                hsv[[y, x, 0]] = h;
                hsv[[y, x, 1]] = s;
                hsv[[y, x, 2]] = v;
            }
        }

        hsv
    }

    /// Copy of the pixels inside `roi` (clipped to the image).
    pub fn crop(&self, roi: Roi) -> Image {
        let r = roi.clip_to(self.width(), self.height(), false);
        let view = self.data.slice(s![
            r.y as usize..r.bottom() as usize,
            r.x as usize..r.right() as usize,
            ..
        ]);

        Image::from_array(view.to_owned())
    }
}

/// Image pyramid where level `i` has half the resolution of level `i - 1`.
pub fn pyramid(base: &GrayImage, levels: usize) -> Vec<GrayImage> {
    let mut out = Vec::with_capacity(levels + 1);
    out.push(base.clone());

    for _ in 0..levels {
        let prev = &out[out.len() - 1];
        let (rows, cols) = (prev.nrows() / 2, prev.ncols() / 2);
        if rows < 2 || cols < 2 {
            break;
        }

        let next = Array2::from_shape_fn((rows, cols), |(y, x)| {
            let (y2, x2) = (2 * y, 2 * x);
            0.25 * (prev[[y2, x2]] + prev[[y2 + 1, x2]] + prev[[y2, x2 + 1]] + prev[[y2 + 1, x2 + 1]])
        });
        out.push(next);
    }

    out
}

/// Bilinear sample, clamped at the image border.
pub fn bilinear(img: &GrayImage, x: f64, y: f64) -> f32 {
    let (rows, cols) = (img.nrows(), img.ncols());
    if rows == 0 || cols == 0 {
        return 0.0;
    }

    let x = x.clamp(0.0, (cols - 1) as f64);
    let y = y.clamp(0.0, (rows - 1) as f64);
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(cols - 1), (y0 + 1).min(rows - 1));
    let (fx, fy) = ((x - x0 as f64) as f32, (y - y0 as f64) as f32);

    let top = img[[y0, x0]] * (1.0 - fx) + img[[y0, x1]] * fx;
    let bottom = img[[y1, x0]] * (1.0 - fx) + img[[y1, x1]] * fx;

    top * (1.0 - fy) + bottom * fy
}
