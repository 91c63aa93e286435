use super::Spacing;
use crate::error::AnalysisError;
use ndarray::ArrayView2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeMeasurement {
    /// Σ z·dx·dy in real units³
    pub volume: f64,
    /// Real area of the region's footprint
    pub base_area: f64,
    /// Mean scaled height over the region
    pub mean_height: f64,
}

/// Riemann-sum volume under `samples * z_factor`.
pub fn volume(
    samples: ArrayView2<f64>,
    spacing: Spacing,
    z_factor: f64,
) -> Result<VolumeMeasurement, AnalysisError> {
    let count = samples.len();
    if count == 0 {
        return Err(AnalysisError::InsufficientData(
            "volume needs at least one sample".to_string(),
        ));
    }

    let cell_area = spacing.cell_area();
    let height_sum = samples.sum() * z_factor;

    Ok(VolumeMeasurement {
        volume: height_sum * cell_area,
        base_area: count as f64 * cell_area,
        mean_height: height_sum / count as f64,
    })
}
