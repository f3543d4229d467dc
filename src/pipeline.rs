//! Per-frame orchestration of filtering, tracking and recognition.

use crate::calibration::Calibration;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::filter::{inner_roi, FilterChain};
use crate::image::Image;
use crate::missing_frames::MissingFrames;
use crate::person_storage::{AddPointsReport, PersonStorage, PurgeReport, Selection};
use crate::recognition::{Recognition, RecognitionContext, RecognitionMethod};
use crate::source::FrameSource;
use crate::stereo::DisparityMap;
use crate::tracker::{TrackInput, Tracker};
use nalgebra as na;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, info, warn};

/// Shared flag to stop long running operations between two frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: usize,
    /// Tracked points committed.
    pub tracked: usize,
    /// Markers found by the recognizer.
    pub recognized: usize,
    pub added: AddPointsReport,
    /// Points and persons removed by purging.
    pub purged: PurgeReport,
    /// Persons present at the frame afterwards.
    pub visible: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub frames: usize,
    /// Frames that could not be decoded.
    pub skipped: Vec<usize>,
    pub tracked: usize,
    pub recognized: usize,
    pub created: usize,
}

impl BatchReport {
    fn add(&mut self, r: &FrameReport) {
        self.frames += 1;
        self.tracked += r.tracked;
        self.recognized += r.recognized;
        self.created += r.added.created.len();
    }
}

/// Copy of the pipeline data taken under the lock.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub config: PipelineConfig,
    pub storage: PersonStorage,
    pub missing_frames: MissingFrames,
    pub track_changed: bool,
    pub recognition_changed: bool,
}

pub struct PipelineState {
    config: PipelineConfig,
    storage: PersonStorage,
    tracker: Tracker,
    recognition: Recognition,
    filters: FilterChain,
    missing_frames: MissingFrames,
    track_changed: bool,
    recognition_changed: bool,
    last_output: Option<u64>,
}

impl PipelineState {
    fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let mut recognition = Recognition::from_config(&config.recognition);
        recognition.set_active(config.recognition.method)?;

        Ok(Self {
            storage: PersonStorage::new(config.storage),
            tracker: Tracker::new(config.tracker),
            filters: FilterChain::from_config(&config.filters, &config.calibration.intrinsic),
            recognition,
            config,
            missing_frames: MissingFrames::default(),
            track_changed: true,
            recognition_changed: true,
            last_output: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replaces the settings and marks the affected stages for recomputation.
    pub fn set_config(&mut self, config: PipelineConfig) -> Result<()> {
        config.validate()?;

        if config.recognition != self.config.recognition || config.reco_roi != self.config.reco_roi {
            let mut recognition = Recognition::from_config(&config.recognition);
            recognition.set_active(config.recognition.method)?;
            self.recognition = recognition;
            self.recognition_changed = true;
        }

        if config.filters != self.config.filters || config.calibration.intrinsic != self.config.calibration.intrinsic {
            self.filters = FilterChain::from_config(&config.filters, &config.calibration.intrinsic);
            self.tracker.reset();
            self.track_changed = true;
        }

        if config.tracker != self.config.tracker || config.track_roi != self.config.track_roi {
            self.tracker.set_config(config.tracker);
            self.track_changed = true;
        }

        self.storage.set_config(config.storage);
        self.config = config;

        Ok(())
    }

    #[inline]
    pub fn storage(&self) -> &PersonStorage {
        &self.storage
    }

    /// Storage for manual edits. The next frame is tracked again.
    pub fn storage_mut(&mut self) -> &mut PersonStorage {
        self.track_changed = true;
        &mut self.storage
    }

    #[inline]
    pub fn missing_frames(&self) -> &MissingFrames {
        &self.missing_frames
    }

    pub fn missing_frames_mut(&mut self) -> &mut MissingFrames {
        &mut self.missing_frames
    }

    #[inline]
    pub fn track_changed(&self) -> bool {
        self.track_changed
    }

    #[inline]
    pub fn recognition_changed(&self) -> bool {
        self.recognition_changed
    }

    /// Calibration matching the filtered images.
    pub fn effective_calibration(&self) -> Calibration {
        if self.config.filters.undistort {
            self.config.calibration.for_undistorted_image()
        } else {
            self.config.calibration
        }
    }

    /// Filter chain border in pixels.
    #[inline]
    pub fn border(&self) -> u32 {
        self.filters.border()
    }

    fn head_size(&self, image: &Image) -> f64 {
        let centre = na::Point2::new(image.width() as f64 / 2.0, image.height() as f64 / 2.0);

        self.effective_calibration()
            .head_size_px(&centre, self.config.export.default_height)
            .ok()
            .filter(|h| h.is_finite() && *h > 1.0)
            .unwrap_or(self.config.tracker.default_head_size)
    }

    /// Runs one frame. Every fallible step happens before the first
    /// mutation of the storage.
    fn step(
        &mut self,
        num: usize,
        image: &Image,
        disparity: Option<&DisparityMap>,
        recognize: bool,
    ) -> Result<FrameReport> {
        let filtered = self.filters.run(image, num as u64);
        let image_changed = self.filters.changed_since(self.last_output);
        let border = self.filters.border();
        let calibration = self.effective_calibration();
        let head = self.head_size(image);

        // a reset tracker needs this frame as reference even if it is unchanged
        let unseen = self.tracker.last_frame() != Some(num);

        let cfg = &self.config;
        let tracked = if cfg.tracking && (image_changed || self.track_changed || unseen) {
            let gray = filtered.to_gray();
            let input = TrackInput {
                frame: num,
                image: &gray,
                border: border as f64,
                roi: cfg.track_roi,
                selection: &Selection::All,
                calibration: calibration.is_extrinsic_calibrated().then_some(&calibration),
                default_height: cfg.export.default_height,
            };
            Some(self.tracker.track(&self.storage, &input))
        } else {
            None
        };

        let reco = &cfg.recognition;
        let due = num % reco.step == 0 || self.recognition_changed;
        let mut wanted = recognize && reco.enabled && due;
        if wanted && disparity.is_none() && self.recognition.active() == RecognitionMethod::Stereo {
            debug!("frame {}: no disparity map, markerless recognition skipped", num);
            wanted = false;
        }

        let found = if wanted {
            let b = border as i32;
            let roi = cfg
                .reco_roi
                .map(|r| r.translated(b, b))
                .unwrap_or_else(|| inner_roi(&filtered, border));

            let mut ctx = RecognitionContext::new(num, head);
            ctx.foreground = self.filters.foreground();
            ctx.disparity = disparity;
            ctx.border = border;

            let frame = self.recognition.recognize(&filtered, roi, &ctx)?;
            Some(frame.track_points(border as f64))
        } else {
            None
        };

        let mut report = FrameReport {
            frame: num,
            ..Default::default()
        };

        if let Some((updates, state)) = tracked {
            report.tracked = Tracker::apply(&mut self.storage, &updates);
            self.tracker.remember(state);
        }

        if let Some(points) = found {
            report.recognized = points.len();
            report.added = self
                .storage
                .add_points(&points, num, self.config.recognition.method);
        }

        if let Some(d) = disparity {
            self.storage.calc_world_positions(num, d);
        }

        if self.config.purge {
            report.purged = self.storage.purge(num);
        }

        self.last_output = self.filters.output_key();
        self.track_changed = false;
        self.recognition_changed = false;
        report.visible = self.storage.visible(num);

        debug!(
            "frame {}: {} tracked, {} recognized, {} new persons",
            num, report.tracked, report.recognized, report.added.created.len()
        );

        Ok(report)
    }

    fn run_pass<I: Iterator<Item = usize>>(
        &mut self,
        source: &mut dyn FrameSource,
        frames: I,
        recognize: bool,
        cancel: &CancelToken,
        report: &mut BatchReport,
        progress: &mut dyn FnMut(usize),
    ) -> Result<()> {
        self.tracker.reset();

        for num in frames {
            if cancel.is_cancelled() {
                info!("cancelled before frame {}", num);
                return Err(Error::Cancelled);
            }

            match source.frame(num)? {
                Some(image) => {
                    let disparity = source.disparity(num)?;
                    let r = self.step(num, &image, disparity.as_ref(), recognize)?;
                    report.add(&r);
                }
                None => {
                    warn!("frame {} could not be decoded, skipped", num);
                    self.tracker.reset();
                    if !report.skipped.contains(&num) {
                        report.skipped.push(num);
                    }
                }
            }

            progress(num);
        }

        Ok(())
    }
}

/// The tracking core behind a lock. Frame requests arriving while a frame
/// is being processed are dropped.
pub struct Pipeline {
    state: Mutex<PipelineState>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(PipelineState::new(config)?),
        })
    }

    fn try_state(&self) -> Option<MutexGuard<'_, PipelineState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Blocks until the state is free and runs `f` on it.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PipelineState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.with_state(|s| Snapshot {
            config: s.config.clone(),
            storage: s.storage.clone(),
            missing_frames: s.missing_frames.clone(),
            track_changed: s.track_changed,
            recognition_changed: s.recognition_changed,
        })
    }

    /// Processes frame `num`. Returns `Ok(None)` when another frame is
    /// still in progress.
    pub fn process_frame(&self, num: usize, image: &Image) -> Result<Option<FrameReport>> {
        let Some(mut state) = self.try_state() else {
            debug!("frame {} dropped, pipeline busy", num);
            return Ok(None);
        };

        state.step(num, image, None, true).map(Some)
    }

    /// Like [`process_frame`](Self::process_frame) with the disparity map
    /// of a stereo pair for markerless recognition and stereo heights.
    pub fn process_stereo_frame(
        &self,
        num: usize,
        image: &Image,
        disparity: &DisparityMap,
    ) -> Result<Option<FrameReport>> {
        let Some(mut state) = self.try_state() else {
            debug!("frame {} dropped, pipeline busy", num);
            return Ok(None);
        };

        state.step(num, image, Some(disparity), true).map(Some)
    }

    /// Tracks `range` forward with recognition, then backward with tracking
    /// only if enabled. `progress` receives the frames done and the total.
    /// Returns `Ok(None)` when the pipeline is busy.
    pub fn track_all(
        &self,
        source: &mut dyn FrameSource,
        range: Range<usize>,
        cancel: &CancelToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Option<BatchReport>> {
        let Some(mut state) = self.try_state() else {
            return Ok(None);
        };

        let range = range.start..range.end.min(source.num_frames());
        let passes = if state.config.track_backward { 2 } else { 1 };
        let total = range.len() * passes;
        let mut done = 0;
        let mut report = BatchReport::default();

        state.run_pass(source, range.clone(), true, cancel, &mut report, &mut |_| {
            done += 1;
            progress(done, total);
        })?;

        if passes == 2 {
            state.run_pass(source, range.clone().rev(), false, cancel, &mut report, &mut |_| {
                done += 1;
                progress(done, total);
            })?;
        }

        report.skipped.sort_unstable();
        info!(
            "tracked frames {}..{}: {} points tracked, {} markers, {} persons created, {} frames skipped",
            range.start,
            range.end,
            report.tracked,
            report.recognized,
            report.created,
            report.skipped.len()
        );

        Ok(Some(report))
    }
}
