use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use shared::image_proc::image::GrayMode;
use std::path::Path;
use std::time::Duration;

/// Target range for normalized intensities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityRange {
    /// Divide by the buffer's maximum representable value, giving [0, 1]
    #[default]
    Unit,
    /// Keep raw digital numbers
    Native,
}

/// Frame normalization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// How RGB frames are reduced to one channel
    pub gray_mode: GrayMode,
    pub intensity_range: IntensityRange,
    /// Mirror left/right (e.g. front-facing webcams)
    pub flip_horizontal: bool,
    /// Mirror top/bottom
    pub flip_vertical: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            gray_mode: GrayMode::Luminosity,
            intensity_range: IntensityRange::Unit,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

/// Configuration for the measurement pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of analysis worker threads
    pub worker_threads: usize,
    /// Maximum number of cached results
    pub cache_capacity: usize,
    /// Pixels per real unit used while uncalibrated
    pub manual_scale: f64,
    /// Unit label paired with `manual_scale`
    pub manual_unit: String,
    /// Length in pixels of the longest side of the rectified calibration target
    pub rectified_long_side: f64,
    /// Largest region (in pixels) accepted at submission, None for unbounded
    pub max_region_pixels: Option<usize>,
    /// Largest rectified patch a perspective warp may produce
    pub max_warp_samples: usize,
    /// Minimum inverse condition number of the calibration point scatter
    pub degeneracy_threshold: f64,
    /// Delay between attempts to reach an unavailable device (milliseconds)
    pub device_retry_ms: u64,
    /// Frame normalization settings
    pub preprocess: PreprocessConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            cache_capacity: 64,
            manual_scale: 1.0,
            manual_unit: "px".to_string(),
            rectified_long_side: 1000.0,
            max_region_pixels: Some(4_000_000),
            max_warp_samples: 4_000_000,
            degeneracy_threshold: 1e-3,
            device_retry_ms: 250,
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if !self.manual_scale.is_finite() || self.manual_scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "manual_scale must be positive, got {}",
                self.manual_scale
            )));
        }
        if !self.rectified_long_side.is_finite() || self.rectified_long_side < 2.0 {
            return Err(ConfigError::Invalid(format!(
                "rectified_long_side must be at least 2, got {}",
                self.rectified_long_side
            )));
        }
        if !self.degeneracy_threshold.is_finite() || self.degeneracy_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "degeneracy_threshold must be positive, got {}",
                self.degeneracy_threshold
            )));
        }
        if self.max_region_pixels == Some(0) || self.max_warp_samples == 0 {
            return Err(ConfigError::Invalid(
                "region and warp limits must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn device_retry_interval(&self) -> Duration {
        Duration::from_millis(self.device_retry_ms)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
