use crate::blob::Mask;
use crate::code_marker::{CodeMarker, CodeMarkerConfig};
use crate::color_marker::{ColorMarker, ColorMarkerConfig};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::image::Image;
use crate::multi_color_marker::{MultiColorMarker, MultiColorMarkerConfig};
use crate::roi::Roi;
use crate::stereo::{DisparityMap, StereoMarker, StereoMarkerConfig};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecognitionMethod {
    Color,
    #[default]
    MultiColor,
    Code,
    Stereo,
}

/// Per frame inputs a recognizer may use besides the image.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionContext<'a> {
    pub frame: usize,
    /// Expected head diameter in pixels.
    pub head_size: f64,
    /// Foreground mask of the background subtraction, full image size.
    pub foreground: Option<&'a Mask>,
    /// Disparity map indexed in border-free image coordinates.
    pub disparity: Option<&'a DisparityMap>,
    /// Border in pixels the image carries around the original frame.
    pub border: u32,
}

impl<'a> RecognitionContext<'a> {
    pub fn new(frame: usize, head_size: f64) -> Self {
        Self {
            frame,
            head_size,
            foreground: None,
            disparity: None,
            border: 0,
        }
    }
}

/// Marker detector for one recognition method. Implementations never touch
/// the person storage; finding nothing yields an empty frame.
pub trait Recognizer: Send {
    fn method(&self) -> RecognitionMethod;

    fn recognize(&mut self, image: &Image, roi: Roi, ctx: &RecognitionContext<'_>) -> Result<Frame>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecognitionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub method: RecognitionMethod,
    /// Recognize every `step` frames.
    #[serde(default = "default_step")]
    pub step: usize,
    #[serde(default)]
    pub color: ColorMarkerConfig,
    #[serde(default)]
    pub multi_color: MultiColorMarkerConfig,
    #[serde(default)]
    pub code: CodeMarkerConfig,
    #[serde(default)]
    pub stereo: StereoMarkerConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_step() -> usize {
    1
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            method: RecognitionMethod::default(),
            step: default_step(),
            color: ColorMarkerConfig::default(),
            multi_color: MultiColorMarkerConfig::default(),
            code: CodeMarkerConfig::default(),
            stereo: StereoMarkerConfig::default(),
        }
    }
}

/// Registered recognizers keyed by method, one of them active.
pub struct Recognition {
    recognizers: HashMap<RecognitionMethod, Box<dyn Recognizer>>,
    active: RecognitionMethod,
}

impl Recognition {
    pub fn new(active: RecognitionMethod) -> Self {
        Self {
            recognizers: HashMap::new(),
            active,
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        let mut reco = Self::new(config.method);
        reco.register(Box::new(ColorMarker::new(config.color.clone())));
        reco.register(Box::new(MultiColorMarker::new(config.multi_color.clone())));
        reco.register(Box::new(CodeMarker::new(config.code.clone())));
        reco.register(Box::new(StereoMarker::new(config.stereo.clone())));

        reco
    }

    /// Adds `recognizer`, returning the one it replaces.
    pub fn register(&mut self, recognizer: Box<dyn Recognizer>) -> Option<Box<dyn Recognizer>> {
        self.recognizers.insert(recognizer.method(), recognizer)
    }

    #[inline]
    pub fn active(&self) -> RecognitionMethod {
        self.active
    }

    pub fn set_active(&mut self, method: RecognitionMethod) -> Result<()> {
        if !self.recognizers.contains_key(&method) {
            return Err(Error::InvalidConfig(format!("no recognizer registered for {:?}", method)));
        }

        self.active = method;
        Ok(())
    }

    pub fn recognize(&mut self, image: &Image, roi: Roi, ctx: &RecognitionContext<'_>) -> Result<Frame> {
        let active = self.active;
        let recognizer = self
            .recognizers
            .get_mut(&active)
            .ok_or_else(|| Error::InvalidConfig(format!("no recognizer registered for {:?}", active)))?;

        let roi = roi.clip_to(image.width(), image.height(), false);
        if roi.is_empty() {
            return Ok(Frame::new(ctx.frame, Vec::new()));
        }

        let frame = recognizer.recognize(image, roi, ctx)?;
        debug!("frame {}: {:?} found {} markers", ctx.frame, active, frame.len());

        Ok(frame)
    }
}
