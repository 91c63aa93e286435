//! Four-point homography estimation and point-configuration checks.
//!
//! The solve is a normalized DLT: points are translated to their centroid and
//! scaled to mean distance sqrt(2) before building the linear system, which
//! keeps the eigen-decomposition well conditioned for pixel-sized inputs.

use crate::error::CalibrationError;
use nalgebra::{DMatrix, Matrix2, Matrix3, SymmetricEigen, Vector3};

/// Project a point through a homography with homogeneous divide.
///
/// Returns NaN coordinates when the point maps to the line at infinity.
pub fn project(h: &Matrix3<f64>, p: [f64; 2]) -> [f64; 2] {
    let q = h * Vector3::new(p[0], p[1], 1.0);
    if q[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [q[0] / q[2], q[1] / q[2]]
}

/// Translate centroid to origin and scale so mean distance is sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist = pts
        .iter()
        .map(|p| (p[0] - cx).hypot(p[1] - cy))
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();

    (t, normalized)
}

/// Reject point sets that cannot define a perspective mapping.
///
/// Points are expected in TL, TR, BR, BL order. Checks, in normalized
/// coordinates so the thresholds are resolution independent:
/// - every triangle spanned by three of the points has area above `threshold`
/// - the inverse condition number of the point scatter is above `threshold`
/// - the quadrilateral is convex, not self-intersecting and wound TL, TR, BR, BL
pub fn check_configuration(pts: &[[f64; 2]; 4], threshold: f64) -> Result<(), CalibrationError> {
    let (_, n) = normalize_points(pts);

    for (a, b, c) in [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)] {
        let area = triangle_area(n[a], n[b], n[c]);
        if area < threshold {
            return Err(CalibrationError::Degenerate(format!(
                "points {a}, {b} and {c} are collinear"
            )));
        }
    }

    let scatter = n.iter().fold(Matrix2::zeros(), |acc, p| {
        acc + Matrix2::new(p[0] * p[0], p[0] * p[1], p[0] * p[1], p[1] * p[1])
    });
    let eig = SymmetricEigen::new(scatter);
    let (lo, hi) = (eig.eigenvalues.min(), eig.eigenvalues.max());
    if hi <= 0.0 || lo / hi < threshold {
        return Err(CalibrationError::Degenerate(format!(
            "point spread is ill-conditioned (inverse condition {:.2e})",
            if hi > 0.0 { lo / hi } else { 0.0 }
        )));
    }

    // With y pointing down, TL -> TR -> BR -> BL turns positive at every corner.
    // A uniformly negative turn is the mirrored click order.
    let turns: Vec<f64> = (0..4)
        .map(|i| {
            let p0 = n[i];
            let p1 = n[(i + 1) % 4];
            let p2 = n[(i + 2) % 4];
            (p1[0] - p0[0]) * (p2[1] - p1[1]) - (p1[1] - p0[1]) * (p2[0] - p1[0])
        })
        .collect();
    if turns.iter().all(|t| *t < 0.0) {
        return Err(CalibrationError::Degenerate(
            "points are mirrored; click corners in TL, TR, BR, BL order".to_string(),
        ));
    }
    if turns.iter().any(|t| *t <= 0.0) {
        return Err(CalibrationError::Degenerate(
            "points must outline a convex quadrilateral in corner order".to_string(),
        ));
    }

    Ok(())
}

fn triangle_area(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    0.5 * ((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])).abs()
}

/// Estimate H such that `dst ≈ project(H, src)` from four or more correspondences.
pub fn estimate_homography(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, CalibrationError> {
    let n = src.len();
    if n < 4 || n != dst.len() {
        return Err(CalibrationError::Degenerate(format!(
            "need at least 4 matched points, got {} and {}",
            src.len(),
            dst.len()
        )));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    // Two rows per correspondence of the 2n x 9 system A h = 0
    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // h is the eigenvector of AᵀA with the smallest eigenvalue
    let ata = a.transpose() * &a;
    let eig = SymmetricEigen::new(ata);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|(_, x), (_, y)| x.abs().total_cmp(&y.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let t_dst_inv = t_dst.try_inverse().ok_or(CalibrationError::Singular)?;
    let h = t_dst_inv * h_norm * t_src;

    let w = h[(2, 2)];
    if w.abs() < 1e-15 || h.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::Singular);
    }
    Ok(h / w)
}

/// Invert a homography, rejecting singular or numerically unusable matrices
pub fn invert(h: &Matrix3<f64>) -> Result<Matrix3<f64>, CalibrationError> {
    let inv = h.try_inverse().ok_or(CalibrationError::Singular)?;
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::Singular);
    }
    Ok(inv)
}

/// Row-major entries, as persisted
pub fn to_row_major(h: &Matrix3<f64>) -> [f64; 9] {
    [
        h[(0, 0)],
        h[(0, 1)],
        h[(0, 2)],
        h[(1, 0)],
        h[(1, 1)],
        h[(1, 2)],
        h[(2, 0)],
        h[(2, 1)],
        h[(2, 2)],
    ]
}

pub fn from_row_major(v: &[f64; 9]) -> Matrix3<f64> {
    Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8])
}
