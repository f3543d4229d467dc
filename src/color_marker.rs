use crate::blob::{self, Blob, HsvRange};
use crate::candidate::{self, Candidate};
use crate::error::Result;
use crate::frame::Frame;
use crate::image::Image;
use crate::recognition::{RecognitionContext, RecognitionMethod, Recognizer};
use crate::roi::Roi;
use serde_derive::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_4;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ColorMarkerConfig {
    #[serde(default)]
    pub range: HsvRange,
    /// Smallest blob area relative to the head area.
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    /// Largest blob area relative to the head area.
    #[serde(default = "default_max_area")]
    pub max_area: f64,
    #[serde(default = "default_open_radius")]
    pub open_radius: usize,
    #[serde(default)]
    pub use_foreground: bool,
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f64,
}

pub(crate) fn default_min_area() -> f64 {
    0.2
}

pub(crate) fn default_max_area() -> f64 {
    3.0
}

pub(crate) fn default_open_radius() -> usize {
    1
}

pub(crate) fn default_nms_iou() -> f64 {
    0.3
}

impl Default for ColorMarkerConfig {
    fn default() -> Self {
        Self {
            range: HsvRange::default(),
            min_area: default_min_area(),
            max_area: default_max_area(),
            open_radius: default_open_radius(),
            use_foreground: false,
            nms_iou: default_nms_iou(),
        }
    }
}

/// Area of a disc of diameter `head_size`.
#[inline]
pub(crate) fn head_area(head_size: f64) -> f64 {
    FRAC_PI_4 * head_size * head_size
}

/// Blobs of `image` inside `roi` matching `range`, in local coordinates.
pub(crate) fn color_blobs(
    image: &Image,
    roi: Roi,
    range: &HsvRange,
    open_radius: usize,
    foreground: Option<&blob::Mask>,
) -> Vec<Blob> {
    let crop = image.crop(roi);
    let mut mask = blob::mask_hsv(&crop.to_hsv(), range);

    if let Some(fg) = foreground {
        blob::apply_foreground(&mut mask, fg, (roi.x as usize, roi.y as usize));
    }

    blob::connected_components(&blob::open(&mask, open_radius))
}

/// Single colour blob recognizer. Quality rates how disc-like the blob is.
pub struct ColorMarker {
    config: ColorMarkerConfig,
}

impl ColorMarker {
    pub fn new(config: ColorMarkerConfig) -> Self {
        Self { config }
    }

    fn quality(b: &Blob) -> i32 {
        let fill = (b.fill_ratio() / FRAC_PI_4).min(1.0);
        (100.0 * fill * b.aspect()).round() as i32
    }
}

impl Recognizer for ColorMarker {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Color
    }

    fn recognize(&mut self, image: &Image, roi: Roi, ctx: &RecognitionContext<'_>) -> Result<Frame> {
        let cfg = &self.config;
        let fg = ctx.foreground.filter(|_| cfg.use_foreground);
        let area = head_area(ctx.head_size);
        let crop = image.crop(roi);

        let mut found: Vec<Candidate> = color_blobs(image, roi, &cfg.range, cfg.open_radius, fg)
            .iter()
            .filter(|b| {
                let a = b.area as f64;
                a >= cfg.min_area * area && a <= cfg.max_area * area
            })
            .map(|b| {
                let mut c = Candidate::new(
                    b.centroid.x + roi.x as f64,
                    b.centroid.y + roi.y as f64,
                    b.width() as f64,
                    b.height() as f64,
                    Self::quality(b),
                );
                c.color = Some(b.mean_color(&crop));
                c
            })
            .collect();

        candidate::non_maximum_suppression(&mut found, cfg.nms_iou);

        Ok(Frame::new(ctx.frame, found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Rgb;

    #[test]
    fn finds_green_discs() {
        let mut img = Image::filled(200, 120, Rgb::new(90, 90, 90));
        img.fill_circle(50.0, 40.0, 10.0, Rgb::new(20, 200, 30));
        img.fill_circle(150.0, 80.0, 10.0, Rgb::new(20, 200, 30));
        // too small
        img.fill_circle(100.0, 100.0, 2.0, Rgb::new(20, 200, 30));

        let mut reco = ColorMarker::new(ColorMarkerConfig::default());
        let ctx = RecognitionContext::new(3, 20.0);
        let mut frame = reco.recognize(&img, Roi::full(200, 120), &ctx).unwrap();
        frame.candidates.sort_by(|a, b| a.x.total_cmp(&b.x));

        assert_eq!(frame.len(), 2);
        assert!((frame.candidates[0].x - 50.0).abs() < 1.0);
        assert!((frame.candidates[1].y - 80.0).abs() < 1.0);
        assert!(frame.candidates[0].quality > 80);
    }

    #[test]
    fn respects_roi() {
        let mut img = Image::filled(200, 120, Rgb::new(90, 90, 90));
        img.fill_circle(50.0, 40.0, 10.0, Rgb::new(20, 200, 30));
        img.fill_circle(150.0, 80.0, 10.0, Rgb::new(20, 200, 30));

        let mut reco = ColorMarker::new(ColorMarkerConfig::default());
        let ctx = RecognitionContext::new(0, 20.0);
        let frame = reco.recognize(&img, Roi::new(100, 0, 100, 120), &ctx).unwrap();

        assert_eq!(frame.len(), 1);
        assert!((frame.candidates[0].x - 150.0).abs() < 1.0);
    }

    #[test]
    fn nothing_found_is_empty() {
        let img = Image::filled(64, 64, Rgb::new(90, 90, 90));
        let mut reco = ColorMarker::new(ColorMarkerConfig::default());
        let frame = reco
            .recognize(&img, Roi::full(64, 64), &RecognitionContext::new(0, 20.0))
            .unwrap();

        assert!(frame.is_empty());
    }
}
