//! Analysis requests, results and the keys that tie them together.

use crate::calculus::{ArcLengthProfile, GradientField, VolumeMeasurement};
use crate::calibration::MappingMode;
use crate::error::AnalysisError;
use crate::field::Region;
use serde::{Deserialize, Serialize};
use shared::camera_interface::Timestamp;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Which measurement to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Gradient,
    Volume,
    ArcLength,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 3] = [
        AnalysisKind::Gradient,
        AnalysisKind::Volume,
        AnalysisKind::ArcLength,
    ];

    /// Stable identifier, also used as the tutorial key
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisKind::Gradient => "gradient",
            AnalysisKind::Volume => "volume",
            AnalysisKind::ArcLength => "arc_length",
        }
    }

    /// Minimum (width, height) in samples the measurement can work with
    pub fn min_extent(&self) -> (usize, usize) {
        match self {
            AnalysisKind::Gradient => (2, 2),
            AnalysisKind::Volume => (1, 1),
            AnalysisKind::ArcLength => (2, 1),
        }
    }
}

/// Measurement parameters.
///
/// Floats compare and hash by bit pattern so parameters can key the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub kind: AnalysisKind,
    /// Multiplier converting normalized intensity into height units
    pub z_factor: f64,
    /// Pixels per unit for this request only, ahead of any calibration
    pub scale_override: Option<f64>,
    /// Unit label reported with the result, defaults to the calibrator's
    pub unit: Option<String>,
}

impl AnalysisParams {
    pub fn new(kind: AnalysisKind) -> Self {
        Self {
            kind,
            z_factor: 1.0,
            scale_override: None,
            unit: None,
        }
    }

    pub fn with_z_factor(mut self, z_factor: f64) -> Self {
        self.z_factor = z_factor;
        self
    }

    pub fn with_scale_override(mut self, pixels_per_unit: f64, unit: &str) -> Self {
        self.scale_override = Some(pixels_per_unit);
        self.unit = Some(unit.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.z_factor.is_finite() || self.z_factor <= 0.0 {
            return Err(AnalysisError::InvalidParams(format!(
                "z_factor must be positive, got {}",
                self.z_factor
            )));
        }
        if let Some(scale) = self.scale_override {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(AnalysisError::InvalidParams(format!(
                    "scale override must be positive, got {scale}"
                )));
            }
        }
        Ok(())
    }
}

impl PartialEq for AnalysisParams {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.z_factor.to_bits() == other.z_factor.to_bits()
            && self.scale_override.map(f64::to_bits) == other.scale_override.map(f64::to_bits)
            && self.unit == other.unit
    }
}

impl Eq for AnalysisParams {}

impl Hash for AnalysisParams {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.z_factor.to_bits().hash(state);
        self.scale_override.map(f64::to_bits).hash(state);
        self.unit.hash(state);
    }
}

/// Logical identity of a request: "the current gradient for region R".
///
/// At most one computation per identity runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    pub region: Region,
    pub kind: AnalysisKind,
}

/// A measurement request.
///
/// Equality looks at region and parameters only; `field_version` records
/// which field the request was validated against.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub region: Region,
    pub params: AnalysisParams,
    pub field_version: u64,
}

impl AnalysisRequest {
    pub fn new(region: Region, params: AnalysisParams, field_version: u64) -> Self {
        Self {
            region,
            params,
            field_version,
        }
    }

    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity {
            region: self.region,
            kind: self.params.kind,
        }
    }
}

impl PartialEq for AnalysisRequest {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.params == other.params
    }
}

impl Eq for AnalysisRequest {}

/// Cache key. Embeds the calibration epoch so that bumping the epoch makes
/// every earlier key unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub region: Region,
    pub params: AnalysisParams,
    pub field_version: u64,
    pub epoch: u64,
}

impl CacheKey {
    pub fn new(request: &AnalysisRequest, field_version: u64, epoch: u64) -> Self {
        Self {
            region: request.region,
            params: request.params.clone(),
            field_version,
            epoch,
        }
    }
}

/// Measured value, or the reason measuring failed
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutput {
    Gradient(GradientField),
    Volume(VolumeMeasurement),
    ArcLength(ArcLengthProfile),
    Failed(AnalysisError),
}

impl AnalysisOutput {
    pub fn is_failure(&self) -> bool {
        matches!(self, AnalysisOutput::Failed(_))
    }

    /// Headline number: volume, arc length, or mean slope magnitude
    pub fn scalar(&self) -> Option<f64> {
        match self {
            AnalysisOutput::Gradient(g) => Some(g.mean_magnitude()),
            AnalysisOutput::Volume(v) => Some(v.volume),
            AnalysisOutput::ArcLength(p) => Some(p.length),
            AnalysisOutput::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        match self {
            AnalysisOutput::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Immutable outcome of one executed request
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub request: AnalysisRequest,
    pub output: AnalysisOutput,
    /// Version of the field snapshot actually measured
    pub field_version: u64,
    /// Calibration epoch the measurement was taken under
    pub epoch: u64,
    /// Pixels per unit used for spacing
    pub scale: f64,
    pub unit: String,
    pub mode: MappingMode,
    pub computed_at: Timestamp,
    pub compute_time: Duration,
}

impl AnalysisResult {
    pub fn kind(&self) -> AnalysisKind {
        self.request.params.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn region() -> Region {
        Region::new(1, 2, 10, 8).unwrap()
    }

    #[test]
    fn test_request_equality_ignores_field_version() {
        let params = AnalysisParams::new(AnalysisKind::Volume);
        let a = AnalysisRequest::new(region(), params.clone(), 3);
        let b = AnalysisRequest::new(region(), params, 9);
        assert_eq!(a, b);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_ignores_params_beyond_kind() {
        let a = AnalysisRequest::new(region(), AnalysisParams::new(AnalysisKind::Gradient), 1);
        let b = AnalysisRequest::new(
            region(),
            AnalysisParams::new(AnalysisKind::Gradient).with_z_factor(4.0),
            1,
        );
        assert_ne!(a, b);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_cache_keys_differ_by_epoch_and_version() {
        let req = AnalysisRequest::new(region(), AnalysisParams::new(AnalysisKind::ArcLength), 1);
        let mut keys = HashSet::new();
        keys.insert(CacheKey::new(&req, 1, 0));
        keys.insert(CacheKey::new(&req, 1, 1));
        keys.insert(CacheKey::new(&req, 2, 0));
        keys.insert(CacheKey::new(&req, 1, 0));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_params_validation() {
        assert!(AnalysisParams::new(AnalysisKind::Volume).validate().is_ok());
        assert!(AnalysisParams::new(AnalysisKind::Volume)
            .with_z_factor(0.0)
            .validate()
            .is_err());
        assert!(AnalysisParams::new(AnalysisKind::Volume)
            .with_z_factor(f64::INFINITY)
            .validate()
            .is_err());
        assert!(AnalysisParams::new(AnalysisKind::Volume)
            .with_scale_override(-1.0, "cm")
            .validate()
            .is_err());
    }

    #[test]
    fn test_kind_names_match_tutorial_keys() {
        let names: Vec<_> = AnalysisKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names, vec!["gradient", "volume", "arc_length"]);
    }
}
