//! State shared between the caller, the acquisition thread and workers.

use crate::cache::ResultCache;
use crate::calibration::{CalibrationSnapshot, PerspectiveCalibrator};
use crate::config::PipelineConfig;
use crate::field::FieldSlot;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Submission-time and warp-time size limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_region_pixels: Option<usize>,
    pub max_warp_samples: usize,
}

impl From<&PipelineConfig> for Limits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_region_pixels: config.max_region_pixels,
            max_warp_samples: config.max_warp_samples,
        }
    }
}

struct CalibratorCell {
    calibrator: PerspectiveCalibrator,
    /// Calibrator revision the current cache epoch corresponds to
    seen_revision: u64,
}

/// Current field, calibration and result cache.
///
/// The calibrator and the cache epoch move together: every change to the
/// calibrator's effective mapping bumps the epoch while the calibrator lock
/// is held, so a snapshot and its epoch are always consistent.
pub struct AnalysisContext {
    fields: Arc<FieldSlot>,
    calibrator: Mutex<CalibratorCell>,
    cache: ResultCache,
    limits: Limits,
}

impl AnalysisContext {
    pub fn new(
        fields: Arc<FieldSlot>,
        calibrator: PerspectiveCalibrator,
        cache: ResultCache,
        limits: Limits,
    ) -> Self {
        let seen_revision = calibrator.revision();
        Self {
            fields,
            calibrator: Mutex::new(CalibratorCell {
                calibrator,
                seen_revision,
            }),
            cache,
            limits,
        }
    }

    pub fn fields(&self) -> &Arc<FieldSlot> {
        &self.fields
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, CalibratorCell> {
        self.calibrator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Calibration snapshot together with the epoch it belongs to
    pub fn calibration(&self) -> (CalibrationSnapshot, u64) {
        let cell = self.lock();
        (cell.calibrator.snapshot(), self.cache.epoch())
    }

    /// Run `f` against the calibrator.
    ///
    /// Returns `f`'s output and, if the effective mapping changed, the new
    /// cache epoch.
    pub fn with_calibrator<R>(
        &self,
        f: impl FnOnce(&mut PerspectiveCalibrator) -> R,
    ) -> (R, Option<u64>) {
        let mut cell = self.lock();
        let out = f(&mut cell.calibrator);

        let revision = cell.calibrator.revision();
        let epoch = if revision != cell.seen_revision {
            cell.seen_revision = revision;
            Some(self.cache.invalidate_epoch())
        } else {
            None
        };
        (out, epoch)
    }

    /// Read-only access to the calibrator
    pub fn read_calibrator<R>(&self, f: impl FnOnce(&PerspectiveCalibrator) -> R) -> R {
        f(&self.lock().calibrator)
    }
}
