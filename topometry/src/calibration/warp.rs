use super::homography::project;
use super::Calibration;
use crate::error::AnalysisError;
use crate::field::{Region, ScalarField};
use ndarray::Array2;

/// Region samples resampled onto the rectified grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RectifiedPatch {
    /// One sample per rectified pixel, `[row, col]`
    pub samples: Array2<f64>,
    /// Rectified coordinates of `samples[[0, 0]]`
    pub origin: [f64; 2],
}

/// Resample `region` into an axis-aligned patch of the rectified plane.
///
/// The region's corners are mapped through the homography and the largest
/// axis-aligned box inside the mapped quadrilateral is sampled at one sample
/// per rectified pixel, each value interpolated bilinearly from the source
/// field through H⁻¹.
pub fn warp_region(
    field: &ScalarField,
    region: &Region,
    calibration: &Calibration,
    max_samples: usize,
) -> Result<RectifiedPatch, AnalysisError> {
    if !field.contains(region) {
        return Err(AnalysisError::RegionOutOfBounds {
            region: *region,
            width: field.width(),
            height: field.height(),
        });
    }

    let [tl, tr, br, bl] = region.corners().map(|c| project(&calibration.homography, c));
    if [tl, tr, br, bl].iter().flatten().any(|v| !v.is_finite()) {
        return Err(AnalysisError::Computation(
            "region crosses the calibration horizon".to_string(),
        ));
    }

    // The inner pair of sorted coordinates bounds the inscribed box whichever
    // way the homography orients the quad.
    let inner = |axis: usize| {
        let mut v = [tl[axis], tr[axis], br[axis], bl[axis]];
        v.sort_by(f64::total_cmp);
        (v[1].ceil(), v[2].floor())
    };
    let (x0, x1) = inner(0);
    let (y0, y1) = inner(1);

    if x1 < x0 + 1.0 || y1 < y0 + 1.0 {
        return Err(AnalysisError::InsufficientData(format!(
            "region {region} rectifies to fewer than 2 samples per axis"
        )));
    }

    let cols = (x1 - x0) as usize + 1;
    let rows = (y1 - y0) as usize + 1;
    let total = cols.saturating_mul(rows);
    if total > max_samples {
        return Err(AnalysisError::RegionTooLarge {
            pixels: total,
            limit: max_samples,
        });
    }

    // Keep interpolation inside the selected region
    let (min_x, max_x) = (region.x as f64, (region.x_end() - 1) as f64);
    let (min_y, max_y) = (region.y as f64, (region.y_end() - 1) as f64);

    let samples = Array2::from_shape_fn((rows, cols), |(i, j)| {
        let src = project(&calibration.inverse, [x0 + j as f64, y0 + i as f64]);
        field.sample_bilinear(src[0].clamp(min_x, max_x), src[1].clamp(min_y, max_y))
    });

    tracing::trace!("Warped region {region} to {cols}x{rows} rectified samples");

    Ok(RectifiedPatch {
        samples,
        origin: [x0, y0],
    })
}
