//! Perspective calibration.
//!
//! The calibrator collects four image points outlining a rectangular
//! reference object, solves the homography onto a rectified rectangle of the
//! object's aspect ratio, and from then on maps every measurement through it.
//!
//! State flow:
//! `Uncalibrated -> Collecting -> PendingDimensions -> Calibrated`, with
//! `reset()` returning to `Uncalibrated` from anywhere. Any other transition
//! is rejected with [`CalibrationError::InvalidTransition`].

pub mod homography;
pub mod warp;

use crate::config::PipelineConfig;
use crate::error::{AnalysisError, CalibrationError};
use crate::field::{Region, ScalarField};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use shared::settings_record::SettingsRecord;
use std::sync::Arc;

pub use warp::RectifiedPatch;

/// A solved perspective calibration
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Image pixel to rectified pixel
    pub homography: Matrix3<f64>,
    /// Rectified pixel to image pixel
    pub inverse: Matrix3<f64>,
    /// Rectified pixels per real unit
    pub pixels_per_unit: f64,
    pub unit: String,
}

impl Calibration {
    /// Build a calibration from a homography, checking it can be inverted
    pub fn from_homography(
        homography: Matrix3<f64>,
        pixels_per_unit: f64,
        unit: impl Into<String>,
    ) -> Result<Self, CalibrationError> {
        if !pixels_per_unit.is_finite() || pixels_per_unit <= 0.0 {
            return Err(CalibrationError::InvalidScale(pixels_per_unit));
        }
        let inverse = homography::invert(&homography)?;
        Ok(Self {
            homography,
            inverse,
            pixels_per_unit,
            unit: unit.into(),
        })
    }
}

/// Calibration state machine
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    Uncalibrated,
    /// Gathering corner points, fewer than four so far
    Collecting { points: Vec<[f64; 2]> },
    /// Four points collected, waiting for the reference object's real size
    PendingDimensions { points: [[f64; 2]; 4] },
    Calibrated(Arc<Calibration>),
}

impl CalibrationState {
    pub fn name(&self) -> &'static str {
        match self {
            CalibrationState::Uncalibrated => "uncalibrated",
            CalibrationState::Collecting { .. } => "collecting points",
            CalibrationState::PendingDimensions { .. } => "pending dimensions",
            CalibrationState::Calibrated(_) => "calibrated",
        }
    }
}

/// How a point was mapped, so callers can tell a perspective-corrected value
/// from the uncalibrated fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MappingMode {
    /// Through the calibrated homography
    Perspective,
    /// Identity with a manual pixels-per-unit scale
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mapped {
    pub point: [f64; 2],
    pub mode: MappingMode,
}

/// Where the effective pixels-per-unit figure comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleSource {
    /// Uncalibrated fallback
    Manual,
    Calibrated,
    /// User override; wins over a calibrated scale
    Override,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveScale {
    pub pixels_per_unit: f64,
    pub unit: String,
    pub source: ScaleSource,
}

/// Immutable view of the calibrator handed to workers
#[derive(Debug, Clone)]
pub struct CalibrationSnapshot {
    pub calibration: Option<Arc<Calibration>>,
    pub scale: EffectiveScale,
    pub revision: u64,
}

impl CalibrationSnapshot {
    pub fn mode(&self) -> MappingMode {
        if self.calibration.is_some() {
            MappingMode::Perspective
        } else {
            MappingMode::Manual
        }
    }

    /// Pixel to real-world coordinates
    pub fn forward(&self, p: [f64; 2]) -> Mapped {
        let s = self.scale.pixels_per_unit;
        match &self.calibration {
            Some(cal) => {
                let r = homography::project(&cal.homography, p);
                Mapped {
                    point: [r[0] / s, r[1] / s],
                    mode: MappingMode::Perspective,
                }
            }
            None => Mapped {
                point: [p[0] / s, p[1] / s],
                mode: MappingMode::Manual,
            },
        }
    }

    /// Real-world to pixel coordinates
    pub fn inverse(&self, p: [f64; 2]) -> Mapped {
        let s = self.scale.pixels_per_unit;
        let scaled = [p[0] * s, p[1] * s];
        match &self.calibration {
            Some(cal) => Mapped {
                point: homography::project(&cal.inverse, scaled),
                mode: MappingMode::Perspective,
            },
            None => Mapped {
                point: scaled,
                mode: MappingMode::Manual,
            },
        }
    }

    /// Resample a region onto the undistorted grid measurements run on.
    ///
    /// Uncalibrated, this is a plain copy of the region's samples.
    pub fn warp_region(
        &self,
        field: &ScalarField,
        region: &Region,
        max_samples: usize,
    ) -> Result<RectifiedPatch, AnalysisError> {
        match &self.calibration {
            Some(cal) => warp::warp_region(field, region, cal, max_samples),
            None => Ok(RectifiedPatch {
                samples: field.region_view(region)?.to_owned(),
                origin: [region.x as f64, region.y as f64],
            }),
        }
    }

    /// Map rectified-grid points back into the image, for drawing overlays
    pub fn unwarp_overlay(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        match &self.calibration {
            Some(cal) => points
                .iter()
                .map(|p| homography::project(&cal.inverse, *p))
                .collect(),
            None => points.to_vec(),
        }
    }
}

/// Owner of the calibration state machine and the manual scale fallback.
///
/// `revision()` increments whenever the effective pixel-to-real mapping
/// changes; the pipeline turns each bump into a new cache epoch.
#[derive(Debug, Clone)]
pub struct PerspectiveCalibrator {
    state: CalibrationState,
    manual_scale: f64,
    manual_unit: String,
    scale_override: Option<(f64, String)>,
    rectified_long_side: f64,
    degeneracy_threshold: f64,
    revision: u64,
}

impl PerspectiveCalibrator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            state: CalibrationState::Uncalibrated,
            manual_scale: config.manual_scale,
            manual_unit: config.manual_unit.clone(),
            scale_override: None,
            rectified_long_side: config.rectified_long_side,
            degeneracy_threshold: config.degeneracy_threshold,
            revision: 0,
        }
    }

    /// Restore persisted settings.
    ///
    /// A stored homography that cannot be used is discarded with a warning and
    /// the calibrator starts uncalibrated.
    pub fn from_record(config: &PipelineConfig, record: &SettingsRecord) -> Self {
        let mut calibrator = Self::new(config);
        match record.homography {
            Some(entries) => {
                let h = homography::from_row_major(&entries);
                match Calibration::from_homography(h, record.scale, record.unit.clone()) {
                    Ok(cal) => {
                        tracing::info!(
                            "Restored calibration: {:.4} px/{}",
                            cal.pixels_per_unit,
                            cal.unit
                        );
                        calibrator.state = CalibrationState::Calibrated(Arc::new(cal));
                    }
                    Err(e) => {
                        tracing::warn!("Discarding stored calibration: {e}");
                    }
                }
            }
            None => {
                if record.scale.is_finite() && record.scale > 0.0 {
                    calibrator.manual_scale = record.scale;
                    calibrator.manual_unit = record.unit.clone();
                }
            }
        }
        calibrator
    }

    /// Export the persisted portion of the state
    pub fn to_record(&self, tutorials_seen: Vec<String>) -> SettingsRecord {
        match &self.state {
            CalibrationState::Calibrated(cal) => SettingsRecord {
                scale: cal.pixels_per_unit,
                unit: cal.unit.clone(),
                homography: Some(homography::to_row_major(&cal.homography)),
                tutorials_seen,
            },
            _ => SettingsRecord {
                scale: self.manual_scale,
                unit: self.manual_unit.clone(),
                homography: None,
                tutorials_seen,
            },
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrated(_))
    }

    pub fn mapping_mode(&self) -> MappingMode {
        if self.is_calibrated() {
            MappingMode::Perspective
        } else {
            MappingMode::Manual
        }
    }

    fn invalid(&self, operation: &'static str) -> CalibrationError {
        CalibrationError::InvalidTransition {
            operation,
            state: self.state.name(),
        }
    }

    /// Start collecting points. Only legal while uncalibrated; an active
    /// calibration must be `reset()` first.
    pub fn begin_calibration(&mut self) -> Result<(), CalibrationError> {
        if self.state != CalibrationState::Uncalibrated {
            return Err(self.invalid("begin calibration"));
        }
        self.state = CalibrationState::Collecting { points: Vec::new() };
        tracing::info!("Calibration started, waiting for 4 points");
        Ok(())
    }

    /// Add a corner point (TL, TR, BR, BL order). Returns the number collected.
    pub fn add_point(&mut self, p: [f64; 2]) -> Result<usize, CalibrationError> {
        let CalibrationState::Collecting { points } = &mut self.state else {
            return Err(self.invalid("add point"));
        };
        if !p[0].is_finite() || !p[1].is_finite() {
            return Err(CalibrationError::InvalidPoint { x: p[0], y: p[1] });
        }

        points.push(p);
        let count = points.len();
        tracing::debug!("Calibration point {count}: ({:.1}, {:.1})", p[0], p[1]);

        if count == 4 {
            let quad = [points[0], points[1], points[2], points[3]];
            self.state = CalibrationState::PendingDimensions { points: quad };
            tracing::info!("All 4 calibration points collected, waiting for dimensions");
        }
        Ok(count)
    }

    /// Solve the homography for a reference rectangle of `width` x `height` real units.
    ///
    /// On failure the calibrator stays in `PendingDimensions` so the caller can
    /// retry with different dimensions or reset.
    pub fn apply_dimensions(
        &mut self,
        width: f64,
        height: f64,
        unit: &str,
    ) -> Result<Arc<Calibration>, CalibrationError> {
        let CalibrationState::PendingDimensions { points } = &self.state else {
            return Err(self.invalid("apply dimensions"));
        };
        if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
            return Err(CalibrationError::InvalidDimensions { width, height });
        }

        homography::check_configuration(points, self.degeneracy_threshold)?;

        let (dst_w, dst_h) = if width >= height {
            (self.rectified_long_side, self.rectified_long_side * height / width)
        } else {
            (self.rectified_long_side * width / height, self.rectified_long_side)
        };
        let dst = [[0.0, 0.0], [dst_w, 0.0], [dst_w, dst_h], [0.0, dst_h]];

        let h = homography::estimate_homography(points, &dst)?;
        let cal = Arc::new(Calibration::from_homography(h, dst_w / width, unit)?);

        tracing::info!(
            "Calibrated: {width} x {height} {unit} reference, {:.4} px/{unit}",
            cal.pixels_per_unit
        );
        self.state = CalibrationState::Calibrated(cal.clone());
        self.revision += 1;
        Ok(cal)
    }

    /// Return to `Uncalibrated` from any state
    pub fn reset(&mut self) {
        let was_calibrated = self.is_calibrated();
        self.state = CalibrationState::Uncalibrated;
        if was_calibrated {
            self.revision += 1;
            tracing::info!("Calibration reset");
        }
    }

    /// Set the pixels-per-unit used while uncalibrated
    pub fn set_manual_scale(&mut self, scale: f64, unit: &str) -> Result<(), CalibrationError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CalibrationError::InvalidScale(scale));
        }
        if scale != self.manual_scale || unit != self.manual_unit {
            self.manual_scale = scale;
            self.manual_unit = unit.to_string();
            if !self.is_calibrated() {
                self.revision += 1;
            }
        }
        Ok(())
    }

    /// Force a pixels-per-unit figure regardless of calibration.
    ///
    /// While calibrated the homography still rectifies the image, but
    /// distances are converted with the override instead of the solved scale.
    pub fn set_scale_override(
        &mut self,
        scale_override: Option<(f64, String)>,
    ) -> Result<(), CalibrationError> {
        if let Some((scale, _)) = &scale_override {
            if !scale.is_finite() || *scale <= 0.0 {
                return Err(CalibrationError::InvalidScale(*scale));
            }
        }
        if scale_override != self.scale_override {
            self.scale_override = scale_override;
            self.revision += 1;
        }
        Ok(())
    }

    pub fn effective_scale(&self) -> EffectiveScale {
        if let Some((scale, unit)) = &self.scale_override {
            return EffectiveScale {
                pixels_per_unit: *scale,
                unit: unit.clone(),
                source: ScaleSource::Override,
            };
        }
        match &self.state {
            CalibrationState::Calibrated(cal) => EffectiveScale {
                pixels_per_unit: cal.pixels_per_unit,
                unit: cal.unit.clone(),
                source: ScaleSource::Calibrated,
            },
            _ => EffectiveScale {
                pixels_per_unit: self.manual_scale,
                unit: self.manual_unit.clone(),
                source: ScaleSource::Manual,
            },
        }
    }

    pub fn calibration(&self) -> Option<Arc<Calibration>> {
        match &self.state {
            CalibrationState::Calibrated(cal) => Some(cal.clone()),
            _ => None,
        }
    }

    pub fn inverse_homography(&self) -> Option<Matrix3<f64>> {
        self.calibration().map(|cal| cal.inverse)
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            calibration: self.calibration(),
            scale: self.effective_scale(),
            revision: self.revision,
        }
    }

    pub fn forward(&self, p: [f64; 2]) -> Mapped {
        self.snapshot().forward(p)
    }

    pub fn inverse(&self, p: [f64; 2]) -> Mapped {
        self.snapshot().inverse(p)
    }
}
