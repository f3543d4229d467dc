use crate::error::Result;
use crate::image::Image;
use crate::stereo::DisparityMap;

/// Random access to the frames of a video or image sequence.
pub trait FrameSource: Send {
    /// Decodes frame `index`. `Ok(None)` means the frame exists but could
    /// not be decoded.
    fn frame(&mut self, index: usize) -> Result<Option<Image>>;

    /// Width and height in pixels.
    fn size(&self) -> (u32, u32);

    fn fps(&self) -> f64;

    fn num_frames(&self) -> usize;

    /// Index of the frame returned last.
    fn current_frame_num(&self) -> Option<usize>;

    /// Disparity map of the stereo pair behind frame `index`. Mono sources
    /// have none.
    fn disparity(&mut self, _index: usize) -> Result<Option<DisparityMap>> {
        Ok(None)
    }
}

/// Frames held in memory, `None` entries simulate undecodable frames.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    frames: Vec<Option<Image>>,
    disparities: Vec<Option<DisparityMap>>,
    fps: f64,
    current: Option<usize>,
}

impl MemorySource {
    pub fn new(frames: Vec<Option<Image>>, fps: f64) -> Self {
        Self {
            frames,
            disparities: Vec::new(),
            fps,
            current: None,
        }
    }

    /// Attaches one disparity map per frame, in frame order.
    pub fn with_disparities<I: IntoIterator<Item = Option<DisparityMap>>>(mut self, maps: I) -> Self {
        self.disparities = maps.into_iter().collect();
        self
    }

    pub fn from_images<I: IntoIterator<Item = Image>>(images: I, fps: f64) -> Self {
        Self::new(images.into_iter().map(Some).collect(), fps)
    }
}

impl FrameSource for MemorySource {
    fn frame(&mut self, index: usize) -> Result<Option<Image>> {
        let img = self.frames.get(index).cloned().flatten();
        self.current = Some(index);

        Ok(img)
    }

    fn size(&self) -> (u32, u32) {
        self.frames
            .iter()
            .flatten()
            .next()
            .map_or((0, 0), |img| (img.width(), img.height()))
    }

    #[inline]
    fn fps(&self) -> f64 {
        self.fps
    }

    #[inline]
    fn num_frames(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    fn current_frame_num(&self) -> Option<usize> {
        self.current
    }

    fn disparity(&mut self, index: usize) -> Result<Option<DisparityMap>> {
        Ok(self.disparities.get(index).cloned().flatten())
    }
}
