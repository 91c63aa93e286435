use super::Spacing;
use crate::error::AnalysisError;
use ndarray::{Array2, ArrayView2, Axis, Zip};

/// Per-sample slope of a height field
#[derive(Debug, Clone, PartialEq)]
pub struct GradientField {
    /// ∂z/∂x, real height units per real horizontal unit
    pub dz_dx: Array2<f64>,
    /// ∂z/∂y
    pub dz_dy: Array2<f64>,
    /// |∇z|, for heatmap display
    pub magnitude: Array2<f64>,
    /// atan2(∂z/∂y, ∂z/∂x) in radians
    pub direction: Array2<f64>,
}

impl GradientField {
    pub fn dim(&self) -> (usize, usize) {
        self.magnitude.dim()
    }

    pub fn mean_magnitude(&self) -> f64 {
        self.magnitude.mean().unwrap_or(0.0)
    }

    pub fn max_magnitude(&self) -> f64 {
        self.magnitude.iter().copied().fold(0.0, f64::max)
    }
}

/// First derivative along one axis: central differences inside, one-sided at the ends.
fn diff_along(z: &ArrayView2<f64>, axis: Axis, h: f64) -> Array2<f64> {
    let mut out = Array2::zeros(z.dim());
    let n = z.len_of(axis);

    for (lane, mut out_lane) in z.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        out_lane[0] = (lane[1] - lane[0]) / h;
        out_lane[n - 1] = (lane[n - 1] - lane[n - 2]) / h;
        for i in 1..n - 1 {
            out_lane[i] = (lane[i + 1] - lane[i - 1]) / (2.0 * h);
        }
    }
    out
}

/// Gradient of `samples * z_factor` on a grid with the given spacing.
///
/// Needs at least 2 samples along each axis.
pub fn gradient(
    samples: ArrayView2<f64>,
    spacing: Spacing,
    z_factor: f64,
) -> Result<GradientField, AnalysisError> {
    let (rows, cols) = samples.dim();
    if rows < 2 || cols < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "gradient needs at least 2x2 samples, got {cols}x{rows}"
        )));
    }

    let z = samples.mapv(|v| v * z_factor);
    let dz_dx = diff_along(&z.view(), Axis(1), spacing.dx);
    let dz_dy = diff_along(&z.view(), Axis(0), spacing.dy);

    let magnitude = Zip::from(&dz_dx)
        .and(&dz_dy)
        .map_collect(|gx, gy| gx.hypot(*gy));
    let direction = Zip::from(&dz_dx)
        .and(&dz_dy)
        .map_collect(|gx, gy| gy.atan2(*gx));

    Ok(GradientField {
        dz_dx,
        dz_dy,
        magnitude,
        direction,
    })
}
