//! Video input through OpenCV.

use crate::error::{Error, Result};
use crate::image::Image;
use crate::source::FrameSource;
use ndarray::Array3;
use opencv::{core, prelude::*, videoio};
use std::path::Path;
use tracing::{debug, info};

pub struct OpenCvVideo {
    cap: videoio::VideoCapture,
    size: (u32, u32),
    fps: f64,
    num_frames: usize,
    /// Index of the frame the next `read` returns.
    next: usize,
    current: Option<usize>,
}

impl OpenCvVideo {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let name = path.as_ref().to_string_lossy().into_owned();
        let cap = videoio::VideoCapture::from_file(&name, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(Error::Video(format!("cannot open {}", name)));
        }

        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let num_frames = cap.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;
        info!("opened {} ({}x{}, {} fps, {} frames)", name, width, height, fps, num_frames);

        Ok(Self {
            cap,
            size: (width, height),
            fps,
            num_frames,
            next: 0,
            current: None,
        })
    }

    fn to_image(mat: &core::Mat) -> Result<Image> {
        let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
        if mat.typ() != core::CV_8UC3 {
            return Err(Error::Video(format!("unsupported pixel type {}", mat.typ())));
        }

        let bytes = if mat.is_continuous() {
            mat.data_bytes()?.to_vec()
        } else {
            mat.try_clone()?.data_bytes()?.to_vec()
        };
        let data = Array3::from_shape_vec((rows, cols, 3), bytes)
            .map_err(|e| Error::Video(e.to_string()))?;

        Ok(Image::from_array(data))
    }
}

impl FrameSource for OpenCvVideo {
    fn frame(&mut self, index: usize) -> Result<Option<Image>> {
        if index != self.next {
            self.cap.set(videoio::CAP_PROP_POS_FRAMES, index as f64)?;
        }

        let mut mat = core::Mat::default();
        let ok = self.cap.read(&mut mat)?;
        self.next = index + 1;
        self.current = Some(index);

        if !ok || mat.empty() {
            debug!("frame {} could not be decoded", index);
            return Ok(None);
        }

        Ok(Some(Self::to_image(&mat)?))
    }

    #[inline]
    fn size(&self) -> (u32, u32) {
        self.size
    }

    #[inline]
    fn fps(&self) -> f64 {
        self.fps
    }

    #[inline]
    fn num_frames(&self) -> usize {
        self.num_frames
    }

    #[inline]
    fn current_frame_num(&self) -> Option<usize> {
        self.current
    }
}
