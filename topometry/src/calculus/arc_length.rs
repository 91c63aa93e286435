use super::Spacing;
use crate::error::AnalysisError;
use ndarray::ArrayView2;

/// Horizontal cross-section through the middle row of a region
#[derive(Debug, Clone, PartialEq)]
pub struct ArcLengthProfile {
    /// (x, z) points in real units, one per sample along the row
    pub path: Vec<[f64; 2]>,
    /// Length of the profile, including half a cell at each end
    pub length: f64,
    /// Sum of distances between consecutive points of `path`, without the
    /// end cells
    pub path_length: f64,
    /// Flat-ground extent of the same cross-section
    pub horizontal_extent: f64,
    /// Row index within the region that was profiled
    pub row: usize,
}

/// Total length of a polyline. Fewer than two points have zero length.
pub fn polyline_length(points: &[[f64; 2]]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[1][0] - w[0][0]).hypot(w[1][1] - w[0][1]))
        .sum()
}

/// Arc length of the centre-row cross-section of `samples * z_factor`.
///
/// Each sample stands for a cell `dx` wide, so the profile runs from the left
/// edge of the first cell to the right edge of the last: a flat row of `w`
/// samples measures exactly `w · dx`, and any slope makes it longer.
pub fn arc_length(
    samples: ArrayView2<f64>,
    spacing: Spacing,
    z_factor: f64,
) -> Result<ArcLengthProfile, AnalysisError> {
    let (rows, cols) = samples.dim();
    if rows == 0 || cols < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "arc length needs at least 2 samples across, got {cols}"
        )));
    }

    let row = rows / 2;
    let path: Vec<[f64; 2]> = samples
        .row(row)
        .iter()
        .enumerate()
        .map(|(j, h)| [j as f64 * spacing.dx, h * z_factor])
        .collect();

    let path_length = polyline_length(&path);
    Ok(ArcLengthProfile {
        length: path_length + spacing.dx,
        path_length,
        horizontal_extent: cols as f64 * spacing.dx,
        path,
        row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_polyline_diagonal() {
        let pts: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, i as f64]).collect();
        assert_relative_eq!(polyline_length(&pts), 9.0 * 2f64.sqrt(), max_relative = 1e-12);
    }

    #[test]
    fn test_polyline_horizontal() {
        let pts: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 0.0]).collect();
        assert_relative_eq!(polyline_length(&pts), 9.0);
    }

    #[test]
    fn test_polyline_degenerate() {
        assert_eq!(polyline_length(&[]), 0.0);
        assert_eq!(polyline_length(&[[3.0, 4.0]]), 0.0);
    }

    #[test]
    fn test_flat_profile_equals_scaled_width() {
        let (w, s) = (40, 8.0);
        let z = Array2::from_elem((5, w), 0.25);
        let p = arc_length(z.view(), Spacing::from_scale(s), 3.0).unwrap();
        assert_relative_eq!(p.length, w as f64 / s, max_relative = 1e-12);
        assert_relative_eq!(p.horizontal_extent, w as f64 / s, max_relative = 1e-12);
        assert_relative_eq!(p.path_length, (w - 1) as f64 / s, max_relative = 1e-12);
        assert_eq!(p.path.len(), w);
        assert_eq!(p.row, 2);
    }

    #[test]
    fn test_sloped_profile_exceeds_width() {
        let z = Array2::from_shape_fn((3, 20), |(_, x)| 0.1 * x as f64);
        let p = arc_length(z.view(), Spacing::from_scale(1.0), 1.0).unwrap();
        assert!(p.length > p.horizontal_extent);
        // 19 segments of hypot(1, 0.1) plus one cell
        assert_relative_eq!(p.path_length, 19.0 * 1.01f64.sqrt(), max_relative = 1e-12);
        assert_relative_eq!(p.length, p.path_length + 1.0, max_relative = 1e-12);
        assert_relative_eq!(p.path_length, polyline_length(&p.path), max_relative = 1e-12);
    }

    #[test]
    fn test_uses_centre_row() {
        let mut z = Array2::zeros((4, 3));
        z.row_mut(2).fill(1.0);
        let p = arc_length(z.view(), Spacing::from_scale(1.0), 2.0).unwrap();
        assert_eq!(p.row, 2);
        assert!(p.path.iter().all(|pt| pt[1] == 2.0));
    }

    #[test]
    fn test_single_column_is_insufficient() {
        let z = Array2::<f64>::zeros((5, 1));
        assert!(matches!(
            arc_length(z.view(), Spacing::from_scale(1.0), 1.0),
            Err(AnalysisError::InsufficientData(_))
        ));
    }
}
