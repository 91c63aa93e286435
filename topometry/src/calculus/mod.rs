//! Measurement strategies.
//!
//! Each strategy is a pure function of (samples, spacing, z_factor). The
//! [`MeasurementEngine`] trait is the seam the scheduler calls through, so
//! the dispatch can be swapped out in tests.

pub mod arc_length;
pub mod gradient;
pub mod volume;

use crate::error::AnalysisError;
use crate::request::{AnalysisKind, AnalysisOutput, AnalysisParams};
use ndarray::ArrayView2;

pub use arc_length::{arc_length, polyline_length, ArcLengthProfile};
pub use gradient::{gradient, GradientField};
pub use volume::{volume, VolumeMeasurement};

/// Real-world distance between neighbouring samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    pub dx: f64,
    pub dy: f64,
}

impl Spacing {
    /// Isotropic spacing for a grid with `pixels_per_unit` samples per real unit
    pub fn from_scale(pixels_per_unit: f64) -> Self {
        let d = 1.0 / pixels_per_unit;
        Self { dx: d, dy: d }
    }

    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }
}

/// Runs one measurement over an already-validated, already-rectified patch.
pub trait MeasurementEngine: Send + Sync {
    fn measure(
        &self,
        samples: ArrayView2<f64>,
        params: &AnalysisParams,
        spacing: Spacing,
    ) -> Result<AnalysisOutput, AnalysisError>;
}

/// Production engine: dispatches on the analysis kind
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculusEngine;

impl MeasurementEngine for CalculusEngine {
    fn measure(
        &self,
        samples: ArrayView2<f64>,
        params: &AnalysisParams,
        spacing: Spacing,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let z = params.z_factor;
        Ok(match params.kind {
            AnalysisKind::Gradient => AnalysisOutput::Gradient(gradient(samples, spacing, z)?),
            AnalysisKind::Volume => AnalysisOutput::Volume(volume(samples, spacing, z)?),
            AnalysisKind::ArcLength => AnalysisOutput::ArcLength(arc_length(samples, spacing, z)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_spacing_from_scale() {
        let s = Spacing::from_scale(4.0);
        assert_relative_eq!(s.dx, 0.25);
        assert_relative_eq!(s.cell_area(), 0.0625);
    }

    #[test]
    fn test_engine_dispatches_by_kind() {
        let z = Array2::from_elem((4, 4), 1.0);
        let engine = CalculusEngine;
        let spacing = Spacing::from_scale(1.0);

        let out = engine
            .measure(z.view(), &AnalysisParams::new(AnalysisKind::Volume), spacing)
            .unwrap();
        match out {
            AnalysisOutput::Volume(v) => assert_relative_eq!(v.volume, 16.0),
            other => panic!("unexpected output {other:?}"),
        }

        let out = engine
            .measure(z.view(), &AnalysisParams::new(AnalysisKind::ArcLength), spacing)
            .unwrap();
        assert!(matches!(out, AnalysisOutput::ArcLength(p) if (p.length - 4.0).abs() < 1e-12));

        let out = engine
            .measure(z.view(), &AnalysisParams::new(AnalysisKind::Gradient), spacing)
            .unwrap();
        assert!(matches!(out, AnalysisOutput::Gradient(g) if g.max_magnitude() == 0.0));
    }
}
