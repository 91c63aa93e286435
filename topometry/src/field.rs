//! Versioned scalar fields and the slot that publishes them.
//!
//! The acquisition thread publishes a fresh [`ScalarField`] for every frame.
//! Workers take a snapshot once when a task starts and compute against that
//! immutable value, so a field is never modified while in use.

use crate::error::AnalysisError;
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use shared::camera_interface::Timestamp;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Axis-aligned rectangle in pixel coordinates.
///
/// `x`/`y` are the column/row of the top-left sample; the region covers
/// columns `x..x + width` and rows `y..y + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    /// Create a region, rejecting empty extents
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Result<Self, AnalysisError> {
        if width == 0 || height == 0 {
            return Err(AnalysisError::InsufficientData(format!(
                "region must be non-empty, got {width}x{height}"
            )));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Build a region from two opposite drag corners in any order.
    ///
    /// Corners are exclusive on the far side, matching a rubber-band selection
    /// from `(x1, y1)` to `(x2, y2)`.
    pub fn from_corners(x1: usize, y1: usize, x2: usize, y2: usize) -> Result<Self, AnalysisError> {
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        Self::new(left, top, right - left, bottom - top)
    }

    /// Region covering a whole `width` x `height` field
    pub fn full(width: usize, height: usize) -> Result<Self, AnalysisError> {
        Self::new(0, 0, width, height)
    }

    pub fn x_end(&self) -> usize {
        self.x + self.width
    }

    pub fn y_end(&self) -> usize {
        self.y + self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width.saturating_mul(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region is non-empty and lies entirely inside a `width` x `height` grid.
    ///
    /// Fields are public, so offsets near `usize::MAX` are compared without
    /// forming `x + width`.
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        let inside = |start: usize, extent: usize, limit: usize| {
            limit
                .checked_sub(extent)
                .is_some_and(|max_start| start <= max_start)
        };
        !self.is_empty() && inside(self.x, self.width, width) && inside(self.y, self.height, height)
    }

    /// Sample-centre corners in TL, TR, BR, BL order
    pub fn corners(&self) -> [[f64; 2]; 4] {
        let x0 = self.x as f64;
        let y0 = self.y as f64;
        let x1 = (self.x_end() - 1) as f64;
        let y1 = (self.y_end() - 1) as f64;
        [[x0, y0], [x1, y0], [x1, y1], [x0, y1]]
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Immutable 2D grid of normalized samples with the version it was published under.
#[derive(Debug, Clone)]
pub struct ScalarField {
    data: Array2<f64>,
    version: u64,
    timestamp: Timestamp,
}

impl ScalarField {
    pub fn new(data: Array2<f64>, version: u64, timestamp: Timestamp) -> Self {
        Self {
            data,
            version,
            timestamp,
        }
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn contains(&self, region: &Region) -> bool {
        region.fits_within(self.width(), self.height())
    }

    /// Borrow the samples covered by `region`
    pub fn region_view(&self, region: &Region) -> Result<ArrayView2<'_, f64>, AnalysisError> {
        if !self.contains(region) {
            return Err(AnalysisError::RegionOutOfBounds {
                region: *region,
                width: self.width(),
                height: self.height(),
            });
        }
        Ok(self
            .data
            .slice(s![region.y..region.y_end(), region.x..region.x_end()]))
    }

    /// Bilinear sample at fractional pixel coordinates, clamped to the grid
    pub fn sample_bilinear(&self, x: f64, y: f64) -> f64 {
        let max_x = (self.width() - 1) as f64;
        let max_y = (self.height() - 1) as f64;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width() - 1);
        let y1 = (y0 + 1).min(self.height() - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let top = self.data[[y0, x0]] * (1.0 - fx) + self.data[[y0, x1]] * fx;
        let bottom = self.data[[y1, x0]] * (1.0 - fx) + self.data[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// Holder of the current field.
///
/// The lock only guards the pointer swap; readers clone the `Arc` and drop the
/// guard immediately, so computation never happens under the lock.
#[derive(Debug, Default)]
pub struct FieldSlot {
    current: RwLock<Option<Arc<ScalarField>>>,
}

impl FieldSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current field.
    ///
    /// A field whose version is not newer than the current one is ignored and
    /// `false` is returned.
    pub fn publish(&self, field: ScalarField) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            if field.version <= existing.version {
                tracing::warn!(
                    "Dropping stale field v{} (current v{})",
                    field.version,
                    existing.version
                );
                return false;
            }
        }
        *current = Some(Arc::new(field));
        true
    }

    /// Take a reference to the current field, if any
    pub fn snapshot(&self) -> Option<Arc<ScalarField>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_version(&self) -> Option<u64> {
        self.snapshot().map(|f| f.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_field(width: usize, height: usize, version: u64) -> ScalarField {
        let data = Array2::from_shape_fn((height, width), |(y, x)| (x + 10 * y) as f64);
        ScalarField::new(data, version, Timestamp::default())
    }

    #[test]
    fn test_region_rejects_empty() {
        assert!(Region::new(0, 0, 0, 5).is_err());
        assert!(Region::new(0, 0, 5, 0).is_err());
        assert!(Region::new(3, 4, 1, 1).is_ok());
    }

    #[test]
    fn test_region_from_corners_normalizes_order() {
        let a = Region::from_corners(10, 20, 4, 2).unwrap();
        let b = Region::from_corners(4, 2, 10, 20).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Region::new(4, 2, 6, 18).unwrap());
        assert!(Region::from_corners(5, 5, 5, 9).is_err());
    }

    #[test]
    fn test_region_bounds() {
        let field = ramp_field(8, 6, 1);
        assert!(field.contains(&Region::new(0, 0, 8, 6).unwrap()));
        assert!(field.contains(&Region::new(7, 5, 1, 1).unwrap()));
        assert!(!field.contains(&Region::new(7, 5, 2, 1).unwrap()));
        assert!(!field.contains(&Region::new(0, 6, 1, 1).unwrap()));
    }

    #[test]
    fn test_region_bounds_near_usize_max() {
        let field = ramp_field(16, 16, 1);
        let far = Region {
            x: usize::MAX,
            y: 0,
            width: 2,
            height: 2,
        };
        assert!(!field.contains(&far));
        assert!(!field.contains(&Region {
            x: 0,
            y: 3,
            width: 4,
            height: usize::MAX,
        }));
        assert!(matches!(
            field.region_view(&far),
            Err(AnalysisError::RegionOutOfBounds { width: 16, height: 16, .. })
        ));
        assert_eq!(far.pixel_count(), 4);
        assert_eq!(
            Region {
                x: 0,
                y: 0,
                width: usize::MAX,
                height: 2,
            }
            .pixel_count(),
            usize::MAX
        );
    }

    #[test]
    fn test_empty_region_never_fits() {
        let field = ramp_field(8, 6, 1);
        let empty = Region {
            x: 1,
            y: 1,
            width: 0,
            height: 3,
        };
        assert!(empty.is_empty());
        assert!(!field.contains(&empty));
    }

    #[test]
    fn test_region_view() {
        let field = ramp_field(8, 6, 1);
        let view = field.region_view(&Region::new(2, 1, 3, 2).unwrap()).unwrap();
        assert_eq!(view.dim(), (2, 3));
        assert_eq!(view[[0, 0]], 12.0);
        assert_eq!(view[[1, 2]], 24.0);

        let err = field
            .region_view(&Region::new(6, 0, 4, 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn test_sample_bilinear() {
        let field = ramp_field(4, 4, 1);
        assert_relative_eq!(field.sample_bilinear(1.0, 2.0), 21.0);
        assert_relative_eq!(field.sample_bilinear(1.5, 2.5), 26.5);
        // Clamped outside the grid
        assert_relative_eq!(field.sample_bilinear(-3.0, 0.0), 0.0);
        assert_relative_eq!(field.sample_bilinear(10.0, 3.0), 33.0);
    }

    #[test]
    fn test_slot_publish_and_snapshot() {
        let slot = FieldSlot::new();
        assert!(slot.snapshot().is_none());

        assert!(slot.publish(ramp_field(4, 4, 1)));
        let first = slot.snapshot().unwrap();
        assert!(slot.publish(ramp_field(4, 4, 2)));

        // Earlier snapshot is unaffected by the swap
        assert_eq!(first.version(), 1);
        assert_eq!(slot.current_version(), Some(2));
    }

    #[test]
    fn test_slot_ignores_stale_versions() {
        let slot = FieldSlot::new();
        slot.publish(ramp_field(4, 4, 5));
        assert!(!slot.publish(ramp_field(4, 4, 5)));
        assert!(!slot.publish(ramp_field(4, 4, 3)));
        assert_eq!(slot.current_version(), Some(5));
    }
}
