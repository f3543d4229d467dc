//! Image preprocessing chain. Every stage is memoised: its output is kept
//! together with a key derived from the input key and the stage parameters,
//! and is recomputed only when that key changes.

use crate::blob::Mask;
use crate::calibration::IntrinsicParams;
use crate::image::{Image, Rgb};
use crate::roi::Roi;
use nalgebra as na;
use ndarray::prelude::*;
use ndarray::Zip;
use serde_derive::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

fn hash_of<H: Hash>(value: H) -> u64 {
    let mut h = DefaultHasher::new();
    value.hash(&mut h);
    h.finish()
}

pub trait Filter: Send {
    fn name(&self) -> &'static str;

    /// Changes whenever a parameter affecting the output changes.
    fn key(&self) -> u64;

    fn apply(&mut self, image: &Image) -> Image;

    /// Foreground mask of the last applied image, if the stage computes one.
    fn foreground(&self) -> Option<&Mask> {
        None
    }

    /// Drops internal state such as learned models.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwapFilter {
    pub horizontal: bool,
    pub vertical: bool,
}

impl Filter for SwapFilter {
    fn name(&self) -> &'static str {
        "swap"
    }

    fn key(&self) -> u64 {
        hash_of((self.horizontal, self.vertical))
    }

    fn apply(&mut self, image: &Image) -> Image {
        let data = image.array();
        let out = match (self.horizontal, self.vertical) {
            (false, false) => return image.clone(),
            (true, false) => data.slice(s![.., ..;-1, ..]).to_owned(),
            (false, true) => data.slice(s![..;-1, .., ..]).to_owned(),
            (true, true) => data.slice(s![..;-1, ..;-1, ..]).to_owned(),
        };

        Image::from_array(out)
    }
}

/// `out = in * (contrast + 100) / 100 + brightness`, both in `-100..=100`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrightContrastFilter {
    pub brightness: i32,
    pub contrast: i32,
}

impl Filter for BrightContrastFilter {
    fn name(&self) -> &'static str {
        "bright_contrast"
    }

    fn key(&self) -> u64 {
        hash_of((self.brightness, self.contrast))
    }

    fn apply(&mut self, image: &Image) -> Image {
        if self.brightness == 0 && self.contrast == 0 {
            return image.clone();
        }

        let gain = (self.contrast.clamp(-100, 100) + 100) as f32 / 100.0;
        let offset = self.brightness.clamp(-100, 100) as f32;

        Image::from_array(
            image
                .array()
                .mapv(|v| (v as f32 * gain + offset).round().clamp(0.0, 255.0) as u8),
        )
    }
}

/// Pads the image with `size` pixels of constant colour on every side.
#[derive(Debug, Clone, Copy, Default)]
pub struct BorderFilter {
    pub size: u32,
    pub color: Rgb,
}

impl Filter for BorderFilter {
    fn name(&self) -> &'static str {
        "border"
    }

    fn key(&self) -> u64 {
        hash_of((self.size, self.color))
    }

    fn apply(&mut self, image: &Image) -> Image {
        if self.size == 0 {
            return image.clone();
        }

        let b = self.size as usize;
        let mut out = Image::filled(image.width() + 2 * self.size, image.height() + 2 * self.size, self.color);
        out.array_mut()
            .slice_mut(s![b..b + image.height() as usize, b..b + image.width() as usize, ..])
            .assign(image.array());

        out
    }
}

/// Removes lens distortion. The source position of every output pixel is
/// cached until the size or the parameters change.
#[derive(Debug, Clone)]
pub struct UndistortFilter {
    intrinsic: IntrinsicParams,
    map: Option<((u32, u32), Array3<f32>)>,
}

impl UndistortFilter {
    pub fn new(intrinsic: IntrinsicParams) -> Self {
        Self { intrinsic, map: None }
    }

    pub fn intrinsic(&self) -> &IntrinsicParams {
        &self.intrinsic
    }

    fn update_map(&mut self, width: u32, height: u32) {
        if matches!(&self.map, Some((dims, _)) if *dims == (width, height)) {
            return;
        }

        let intr = self.intrinsic;
        let map = Array3::from_shape_fn((height as usize, width as usize, 2), |(y, x, c)| {
            let src = intr.distort_pixel(&na::Point2::new(x as f64, y as f64));
            if c == 0 {
                src.x as f32
            } else {
                src.y as f32
            }
        });
        debug!("undistortion map rebuilt for {}x{}", width, height);
        self.map = Some(((width, height), map));
    }
}

impl Filter for UndistortFilter {
    fn name(&self) -> &'static str {
        "undistort"
    }

    fn key(&self) -> u64 {
        let i = &self.intrinsic;
        hash_of(
            [i.fx, i.fy, i.cx, i.cy, i.k1, i.k2, i.k3, i.p1, i.p2].map(f64::to_bits),
        )
    }

    fn apply(&mut self, image: &Image) -> Image {
        if !self.intrinsic.has_distortion() {
            return image.clone();
        }

        let (w, h) = (image.width(), image.height());
        self.update_map(w, h);
        let Some((_, map)) = self.map.as_ref() else {
            return image.clone();
        };
        let src = image.array();
        let (cols, rows) = (w as f32, h as f32);

        let data = Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
            let (sx, sy) = (map[[y, x, 0]], map[[y, x, 1]]);
            if sx < 0.0 || sy < 0.0 || sx > cols - 1.0 || sy > rows - 1.0 {
                return 0;
            }

            let (x0, y0) = (sx.floor() as usize, sy.floor() as usize);
            let (x1, y1) = ((x0 + 1).min(w as usize - 1), (y0 + 1).min(h as usize - 1));
            let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

            let top = src[[y0, x0, c]] as f32 * (1.0 - fx) + src[[y0, x1, c]] as f32 * fx;
            let bottom = src[[y1, x0, c]] as f32 * (1.0 - fx) + src[[y1, x1, c]] as f32 * fx;

            (top * (1.0 - fy) + bottom * fy).round() as u8
        });

        Image::from_array(data)
    }
}

/// Running mean background model on grey values.
#[derive(Debug, Clone)]
pub struct BackgroundFilter {
    /// Learning rate of the model.
    pub alpha: f32,
    /// Grey value difference that counts as foreground.
    pub threshold: f32,
    model: Option<Array2<f32>>,
    foreground: Option<Mask>,
}

impl BackgroundFilter {
    pub fn new(alpha: f32, threshold: f32) -> Self {
        Self {
            alpha,
            threshold,
            model: None,
            foreground: None,
        }
    }
}

impl Filter for BackgroundFilter {
    fn name(&self) -> &'static str {
        "background"
    }

    fn key(&self) -> u64 {
        hash_of((self.alpha.to_bits(), self.threshold.to_bits()))
    }

    fn apply(&mut self, image: &Image) -> Image {
        let gray = image.to_gray();

        match &mut self.model {
            Some(model) if model.dim() == gray.dim() => {
                let thr = self.threshold;
                self.foreground = Some(Zip::from(&gray).and(&*model).map_collect(|g, m| (g - m).abs() > thr));

                let a = self.alpha;
                Zip::from(model).and(&gray).for_each(|m, g| *m = (1.0 - a) * *m + a * g);
            }
            _ => {
                self.foreground = Some(Mask::from_elem(gray.dim(), false));
                self.model = Some(gray);
            }
        }

        image.clone()
    }

    fn foreground(&self) -> Option<&Mask> {
        self.foreground.as_ref()
    }

    fn reset(&mut self) {
        self.model = None;
        self.foreground = None;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct BackgroundConfig {
    pub enabled: bool,
    pub alpha: f32,
    pub threshold: f32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 0.05,
            threshold: 30.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub swap_horizontal: bool,
    pub swap_vertical: bool,
    pub brightness: i32,
    pub contrast: i32,
    pub undistort: bool,
    pub border_size: u32,
    pub border_color: Rgb,
    pub background: BackgroundConfig,
}

struct Stage {
    filter: Box<dyn Filter>,
    memo: Option<(u64, Image)>,
}

/// Ordered filter stages with memoised outputs.
#[derive(Default)]
pub struct FilterChain {
    stages: Vec<Stage>,
    border: u32,
    output_key: Option<u64>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap, brightness/contrast, undistortion, border and background in
    /// that order.
    pub fn from_config(config: &FilterConfig, intrinsic: &IntrinsicParams) -> Self {
        let mut chain = Self::new();

        if config.swap_horizontal || config.swap_vertical {
            chain.push(Box::new(SwapFilter {
                horizontal: config.swap_horizontal,
                vertical: config.swap_vertical,
            }));
        }
        if config.brightness != 0 || config.contrast != 0 {
            chain.push(Box::new(BrightContrastFilter {
                brightness: config.brightness,
                contrast: config.contrast,
            }));
        }
        if config.undistort {
            chain.push(Box::new(UndistortFilter::new(*intrinsic)));
        }
        if config.border_size > 0 {
            chain.push(Box::new(BorderFilter {
                size: config.border_size,
                color: config.border_color,
            }));
            chain.border = config.border_size;
        }
        if config.background.enabled {
            chain.push(Box::new(BackgroundFilter::new(
                config.background.alpha,
                config.background.threshold,
            )));
        }

        chain
    }

    pub fn push(&mut self, filter: Box<dyn Filter>) {
        self.stages.push(Stage { filter, memo: None });
        self.output_key = None;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.filter.name()).collect()
    }

    /// Border added by the chain in pixels.
    #[inline]
    pub fn border(&self) -> u32 {
        self.border
    }

    /// Runs `image` identified by `version` through all stages. A stage
    /// whose key is unchanged returns its memoised output.
    pub fn run(&mut self, image: &Image, version: u64) -> Image {
        let mut key = hash_of(version);
        let mut current: Option<&Image> = None;

        for stage in &mut self.stages {
            key = hash_of((key, stage.filter.key()));
            let fresh = matches!(&stage.memo, Some((k, _)) if *k == key);

            if !fresh {
                let input = current.unwrap_or(image);
                let out = stage.filter.apply(input);
                debug!("filter {} recomputed", stage.filter.name());
                stage.memo = Some((key, out));
            }

            current = stage.memo.as_ref().map(|(_, img)| img);
        }

        self.output_key = Some(key);
        current.unwrap_or(image).clone()
    }

    /// Key of the last output.
    #[inline]
    pub fn output_key(&self) -> Option<u64> {
        self.output_key
    }

    /// Whether the last output differs from the one produced with `key`.
    pub fn changed_since(&self, key: Option<u64>) -> bool {
        key.is_none() || self.output_key != key
    }

    pub fn foreground(&self) -> Option<&Mask> {
        self.stages.iter().rev().find_map(|s| s.filter.foreground())
    }

    pub fn reset(&mut self) {
        for s in &mut self.stages {
            s.filter.reset();
            s.memo = None;
        }
        self.output_key = None;
    }
}

/// Roi of the original image inside the bordered one.
pub fn inner_roi(image: &Image, border: u32) -> Roi {
    let b = border as i32;
    Roi::new(b, b, image.width() as i32 - 2 * b, image.height() as i32 - 2 * b)
}
