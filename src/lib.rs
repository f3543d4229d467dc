pub mod blob;
pub mod calibration;
pub mod candidate;
pub mod code_marker;
pub mod color_marker;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod filter;
pub mod frame;
pub mod image;
pub mod math;
pub mod missing_frames;
pub mod multi_color_marker;
pub mod person_files;
pub mod person_storage;
pub mod pipeline;
pub mod recognition;
pub mod roi;
pub mod source;
pub mod stereo;
pub mod trc;
pub mod track_person;
pub mod track_point;
pub mod tracker;
pub mod tracker_real;
#[cfg(feature = "video")]
pub mod video;
pub mod version;
pub mod world_import;

pub use calibration::{Calibration, ExtrinsicParams, IntrinsicParams};
pub use candidate::Candidate;
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use frame::Frame;
pub use image::{Image, Rgb};
pub use person_storage::{PersonStorage, Selection};
pub use pipeline::{CancelToken, Pipeline};
pub use recognition::{RecognitionMethod, Recognizer};
pub use roi::Roi;
pub use source::{FrameSource, MemorySource};
pub use track_person::TrackPerson;
pub use track_point::{PointSource, TrackPoint};
pub use tracker::Tracker;
pub use tracker_real::{ExportOptions, TrackerReal};
