use crate::blob::{self, Blob, HsvRange};
use crate::candidate::{self, Candidate};
use crate::color_marker::{
    color_blobs, default_max_area, default_min_area, default_nms_iou, default_open_radius, head_area,
};
use crate::error::Result;
use crate::frame::Frame;
use crate::image::{GrayImage, Image};
use crate::recognition::{RecognitionContext, RecognitionMethod, Recognizer};
use crate::roi::Roi;
use nalgebra as na;
use ndarray::s;
use serde_derive::{Deserialize, Serialize};

/// Quality of a hat found without its dark dot.
pub const HAT_ONLY_QUALITY: i32 = 75;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MultiColorMarkerConfig {
    #[serde(default = "default_ranges")]
    pub ranges: Vec<HsvRange>,
    /// Grey value below which a pixel belongs to the dot.
    #[serde(default = "default_dot_threshold")]
    pub dot_threshold: f32,
    /// Dot diameter bounds relative to the head size.
    #[serde(default = "default_dot_min_size")]
    pub dot_min_size: f64,
    #[serde(default = "default_dot_max_size")]
    pub dot_max_size: f64,
    /// Drop hats without a dot.
    #[serde(default)]
    pub require_dot: bool,
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    #[serde(default = "default_max_area")]
    pub max_area: f64,
    #[serde(default = "default_open_radius")]
    pub open_radius: usize,
    #[serde(default)]
    pub use_foreground: bool,
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f64,
}

fn default_ranges() -> Vec<HsvRange> {
    vec![
        HsvRange::new((45, 75), (100, 255), (80, 255)),
        HsvRange::new((100, 130), (100, 255), (80, 255)),
        HsvRange::new((10, 170), (100, 255), (80, 255)).inverted(),
    ]
}

fn default_dot_threshold() -> f32 {
    60.0
}

fn default_dot_min_size() -> f64 {
    0.1
}

fn default_dot_max_size() -> f64 {
    0.6
}

impl Default for MultiColorMarkerConfig {
    fn default() -> Self {
        Self {
            ranges: default_ranges(),
            dot_threshold: default_dot_threshold(),
            dot_min_size: default_dot_min_size(),
            dot_max_size: default_dot_max_size(),
            require_dot: false,
            min_area: default_min_area(),
            max_area: default_max_area(),
            open_radius: default_open_radius(),
            use_foreground: false,
            nms_iou: default_nms_iou(),
        }
    }
}

/// Coloured hats carrying a dark dot. The dot gives the position, the hat
/// centre is kept as `col_point`.
pub struct MultiColorMarker {
    config: MultiColorMarkerConfig,
}

impl MultiColorMarker {
    pub fn new(config: MultiColorMarkerConfig) -> Self {
        Self { config }
    }

    /// Centroid of the dark dot inside `hat`, local coordinates.
    fn find_dot(&self, gray: &GrayImage, hat: &Blob, head_size: f64) -> Option<na::Point2<f64>> {
        let cfg = &self.config;
        let sub = gray.slice(s![hat.ymin..=hat.ymax, hat.xmin..=hat.xmax]);
        let mask = sub.mapv(|v| v < cfg.dot_threshold);

        let min_area = head_area(cfg.dot_min_size * head_size);
        let max_area = head_area(cfg.dot_max_size * head_size);
        let offset = na::Vector2::new(hat.xmin as f64, hat.ymin as f64);

        blob::connected_components(&mask)
            .into_iter()
            .filter(|d| {
                let a = d.area as f64;
                a >= min_area && a <= max_area
            })
            .map(|d| d.centroid + offset)
            .filter(|c| hat.bbox_contains(c))
            .min_by(|a, b| {
                na::distance(a, &hat.centroid).total_cmp(&na::distance(b, &hat.centroid))
            })
    }
}

impl Recognizer for MultiColorMarker {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::MultiColor
    }

    fn recognize(&mut self, image: &Image, roi: Roi, ctx: &RecognitionContext<'_>) -> Result<Frame> {
        let cfg = &self.config;
        let fg = ctx.foreground.filter(|_| cfg.use_foreground);
        let area = head_area(ctx.head_size);
        let crop = image.crop(roi);
        let gray = crop.to_gray();
        let offset = na::Vector2::new(roi.x as f64, roi.y as f64);

        let mut found = Vec::new();
        for range in &cfg.ranges {
            for hat in color_blobs(image, roi, range, cfg.open_radius, fg) {
                let a = hat.area as f64;
                if a < cfg.min_area * area || a > cfg.max_area * area {
                    continue;
                }

                let (pos, quality, col_point) = match self.find_dot(&gray, &hat, ctx.head_size) {
                    Some(dot) => (dot, 100, Some(hat.centroid + offset)),
                    None if cfg.require_dot => continue,
                    None => (hat.centroid, HAT_ONLY_QUALITY, None),
                };

                let pos = pos + offset;
                let mut c = Candidate::new(pos.x, pos.y, hat.width() as f64, hat.height() as f64, quality);
                c.col_point = col_point;
                c.color = Some(hat.mean_color(&crop));
                found.push(c);
            }
        }

        candidate::non_maximum_suppression(&mut found, cfg.nms_iou);

        Ok(Frame::new(ctx.frame, found))
    }
}
