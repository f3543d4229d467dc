use crate::calibration::Calibration;
use crate::error::{Error, Result};
use crate::filter::FilterConfig;
use crate::person_storage::StorageConfig;
use crate::recognition::RecognitionConfig;
use crate::roi::Roi;
use crate::tracker::TrackerConfig;
use crate::tracker_real::ExportOptions;
use crate::version::{newer_than_version, Version};
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// All settings of a tracking project.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Version of the crate that wrote the settings.
    #[serde(default = "default_version")]
    pub version: String,
    /// Follow persons from frame to frame.
    #[serde(default = "default_true")]
    pub tracking: bool,
    /// Run a backward pass after the forward pass in `track_all`.
    #[serde(default = "default_true")]
    pub track_backward: bool,
    /// Drop weak tracked tails after each frame.
    #[serde(default)]
    pub purge: bool,
    /// Recognition region in storage coordinates, whole frame if absent.
    #[serde(default)]
    pub reco_roi: Option<Roi>,
    /// Tracking region in storage coordinates, whole frame if absent.
    #[serde(default)]
    pub track_roi: Option<Roi>,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub export: ExportOptions,
}

fn default_version() -> String {
    Version::current().to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            tracking: true,
            track_backward: true,
            purge: false,
            reco_roi: None,
            track_roi: None,
            calibration: Calibration::default(),
            filters: FilterConfig::default(),
            tracker: TrackerConfig::default(),
            storage: StorageConfig::default(),
            recognition: RecognitionConfig::default(),
            export: ExportOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(s)?;
        config.validate()?;

        if newer_than_version(&config.version, &Version::current().to_string())? {
            warn!(
                "settings were written by version {}, this is {}",
                config.version,
                Version::current()
            );
        }

        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        info!("settings loaded from {}", path.as_ref().display());

        Ok(config)
    }

    /// Writes the settings stamped with the current version.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut config = self.clone();
        config.version = default_version();
        fs::write(path.as_ref(), config.to_toml_string()?)?;
        info!("settings saved to {}", path.as_ref().display());

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.version.parse::<Version>()?;

        if self.recognition.step == 0 {
            return Err(Error::InvalidConfig("recognition step must be at least 1".to_string()));
        }
        if self.tracker.region_levels > 8 {
            return Err(Error::InvalidConfig(format!(
                "{} pyramid levels are too many",
                self.tracker.region_levels
            )));
        }
        if self.export.smooth_window == 0 || self.export.smooth_window % 2 == 0 {
            return Err(Error::InvalidConfig(format!(
                "smoothing window {} must be odd",
                self.export.smooth_window
            )));
        }
        let positive = |v: f64| v > 0.0;
        if !positive(self.export.default_height) || !positive(self.export.marker_diameter) {
            return Err(Error::InvalidConfig(
                "default height and marker diameter must be positive".to_string(),
            ));
        }

        for (name, roi) in [("recognition", self.reco_roi), ("tracking", self.track_roi)] {
            if roi.map_or(false, |r| r.is_empty()) {
                return Err(Error::InvalidConfig(format!("{} region is empty", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::tilted_calibration;
    use crate::recognition::RecognitionMethod;

    #[test]
    fn toml_round_trip() {
        let mut config = PipelineConfig::default();
        config.reco_roi = Some(Roi::new(10, 20, 300, 200));
        config.recognition.method = RecognitionMethod::Code;
        config.recognition.step = 3;
        config.calibration = tilted_calibration(true);
        config.filters.border_size = 8;
        config.export.smooth = true;

        let text = config.to_toml_string().unwrap();
        let back = PipelineConfig::from_toml_str(&text).unwrap();

        assert_eq!(back, config);
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let config = PipelineConfig::from_toml_str("[recognition]\nstep = 2\n").unwrap();

        assert_eq!(config.recognition.step, 2);
        assert!(config.recognition.enabled);
        assert_eq!(config.tracker, TrackerConfig::default());
        assert!(config.tracking);
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[recognition]\nstep = 0\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("[export]\nsmooth_window = 4\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("tracking = 3\n"),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.toml");

        let mut config = PipelineConfig::default();
        config.track_roi = Some(Roi::new(0, 0, 640, 480));
        config.save(&path).unwrap();

        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }
}
