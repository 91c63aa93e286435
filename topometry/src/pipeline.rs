//! Top-level facade wiring acquisition, calibration, cache and scheduler.

use crate::acquisition::{spawn_acquisition, AcquisitionHandle};
use crate::cache::{CacheStats, ResultCache};
use crate::calculus::{CalculusEngine, MeasurementEngine};
use crate::calibration::{
    Calibration, CalibrationSnapshot, CalibrationState, EffectiveScale, Mapped, MappingMode,
    PerspectiveCalibrator, RectifiedPatch,
};
use crate::callback::{CallbackId, CallbackRegistry, PipelineEvent};
use crate::config::PipelineConfig;
use crate::context::{AnalysisContext, Limits};
use crate::error::{AnalysisError, CalibrationError, PipelineError};
use crate::field::{FieldSlot, Region, ScalarField};
use crate::preprocess::{IntensityPreprocessor, Preprocessor};
use crate::request::{AnalysisParams, AnalysisRequest};
use crate::scheduler::{Scheduler, SchedulerStats, TaskHandle, TaskStatus};
use nalgebra::Matrix3;
use shared::camera_interface::{CapturedFrame, FrameSource};
use shared::config_storage::ConfigStorage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The measurement pipeline.
///
/// Frames enter either through [`Pipeline::publish_frame`] or a background
/// acquisition thread started with [`Pipeline::start_acquisition`]. Analysis
/// requests are submitted without blocking and resolve through handles or
/// registered callbacks.
pub struct Pipeline {
    config: PipelineConfig,
    context: Arc<AnalysisContext>,
    scheduler: Scheduler,
    preprocessor: Arc<IntensityPreprocessor>,
    callbacks: Arc<CallbackRegistry>,
    storage: Option<ConfigStorage>,
    tutorials: Mutex<Vec<String>>,
    acquisition: Mutex<Option<AcquisitionHandle>>,
}

impl Pipeline {
    /// Pipeline with the standard measurement engine and no persistence
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_parts(config, Arc::new(CalculusEngine), None)
    }

    pub fn with_engine(
        config: PipelineConfig,
        engine: Arc<dyn MeasurementEngine>,
    ) -> Result<Self, PipelineError> {
        Self::with_parts(config, engine, None)
    }

    /// Pipeline that restores and persists calibration and tutorial flags
    pub fn with_storage(
        config: PipelineConfig,
        storage: ConfigStorage,
    ) -> Result<Self, PipelineError> {
        Self::with_parts(config, Arc::new(CalculusEngine), Some(storage))
    }

    pub fn with_parts(
        config: PipelineConfig,
        engine: Arc<dyn MeasurementEngine>,
        storage: Option<ConfigStorage>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let (calibrator, tutorials) = match &storage {
            Some(storage) => {
                let record = storage.load_settings();
                (
                    PerspectiveCalibrator::from_record(&config, &record),
                    record.tutorials_seen,
                )
            }
            None => (PerspectiveCalibrator::new(&config), Vec::new()),
        };

        let context = Arc::new(AnalysisContext::new(
            Arc::new(FieldSlot::new()),
            calibrator,
            ResultCache::new(config.cache_capacity),
            Limits::from(&config),
        ));
        let callbacks = Arc::new(CallbackRegistry::new());
        let scheduler = Scheduler::new(
            context.clone(),
            engine,
            config.worker_threads,
            callbacks.clone(),
        )
        .map_err(PipelineError::Spawn)?;
        let preprocessor = Arc::new(IntensityPreprocessor::new(config.preprocess.clone()));

        Ok(Self {
            config,
            context,
            scheduler,
            preprocessor,
            callbacks,
            storage,
            tutorials: Mutex::new(tutorials),
            acquisition: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // Frames

    /// Normalize `frame` and make it the current field.
    ///
    /// Returns the new field version.
    pub fn publish_frame(&self, frame: &CapturedFrame) -> Result<u64, PipelineError> {
        let field = self.preprocessor.normalize(frame)?;
        let version = field.version();
        let timestamp = field.timestamp();
        if self.context.fields().publish(field) {
            self.callbacks
                .emit(&PipelineEvent::FramePublished { version, timestamp });
        }
        Ok(version)
    }

    /// Pull frames from `source` on a background thread
    pub fn start_acquisition(&self, source: Box<dyn FrameSource>) -> Result<(), PipelineError> {
        let mut slot = self.lock_acquisition();
        if slot.as_ref().is_some_and(AcquisitionHandle::is_running) {
            return Err(PipelineError::AcquisitionRunning);
        }
        if let Some(mut finished) = slot.take() {
            finished.stop();
        }

        let handle = spawn_acquisition(
            source,
            self.preprocessor.clone(),
            self.context.fields().clone(),
            self.callbacks.clone(),
            self.config.device_retry_interval(),
        )
        .map_err(PipelineError::Spawn)?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stop the acquisition thread, if any. Returns the frames it published.
    pub fn stop_acquisition(&self) -> Option<u64> {
        let mut handle = self.lock_acquisition().take()?;
        handle.stop();
        Some(handle.frames_published())
    }

    /// Whether the acquisition thread is running on a lost device
    pub fn is_degraded(&self) -> bool {
        self.lock_acquisition()
            .as_ref()
            .is_some_and(|h| h.stats().is_degraded())
    }

    pub fn current_field(&self) -> Option<Arc<ScalarField>> {
        self.context.fields().snapshot()
    }

    fn lock_acquisition(&self) -> MutexGuard<'_, Option<AcquisitionHandle>> {
        self.acquisition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Calibration

    pub fn begin_calibration(&self) -> Result<(), CalibrationError> {
        self.update_calibration(|cal| cal.begin_calibration())
    }

    /// Add a reference corner; returns the number collected so far
    pub fn add_point(&self, x: f64, y: f64) -> Result<usize, CalibrationError> {
        self.update_calibration(|cal| cal.add_point([x, y]))
    }

    pub fn apply_dimensions(
        &self,
        width: f64,
        height: f64,
        unit: &str,
    ) -> Result<Arc<Calibration>, CalibrationError> {
        self.update_calibration(|cal| cal.apply_dimensions(width, height, unit))
    }

    pub fn reset_calibration(&self) {
        self.update_calibration(|cal| cal.reset())
    }

    pub fn set_manual_scale(&self, scale: f64, unit: &str) -> Result<(), CalibrationError> {
        self.update_calibration(|cal| cal.set_manual_scale(scale, unit))
    }

    /// Override pixels-per-unit for every measurement, or clear the override
    pub fn set_scale_override(&self, scale: Option<(f64, &str)>) -> Result<(), CalibrationError> {
        let scale = scale.map(|(s, unit)| (s, unit.to_string()));
        self.update_calibration(|cal| cal.set_scale_override(scale))
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.context.read_calibrator(|cal| cal.state().clone())
    }

    pub fn calibration_snapshot(&self) -> CalibrationSnapshot {
        self.context.calibration().0
    }

    pub fn effective_scale(&self) -> EffectiveScale {
        self.context.read_calibrator(PerspectiveCalibrator::effective_scale)
    }

    pub fn mapping_mode(&self) -> MappingMode {
        self.context.read_calibrator(PerspectiveCalibrator::mapping_mode)
    }

    pub fn inverse_homography(&self) -> Option<Matrix3<f64>> {
        self.context.read_calibrator(PerspectiveCalibrator::inverse_homography)
    }

    /// Image pixel to real-world coordinates
    pub fn forward(&self, x: f64, y: f64) -> Mapped {
        self.context.read_calibrator(|cal| cal.forward([x, y]))
    }

    /// Real-world coordinates to image pixel
    pub fn inverse(&self, x: f64, y: f64) -> Mapped {
        self.context.read_calibrator(|cal| cal.inverse([x, y]))
    }

    /// Map rectified-grid points back into image pixels for drawing overlays
    pub fn unwarp_overlay(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        self.calibration_snapshot().unwarp_overlay(points)
    }

    /// Rectify `region` of the current field through the active calibration
    pub fn warp_region(&self, region: &Region) -> Result<RectifiedPatch, AnalysisError> {
        let field = self.current_field().ok_or(AnalysisError::NoField)?;
        let snapshot = self.calibration_snapshot();
        snapshot.warp_region(&field, region, self.context.limits().max_warp_samples)
    }

    /// Apply `f` to the calibrator; on an effective change announce the new
    /// epoch and persist.
    fn update_calibration<R>(&self, f: impl FnOnce(&mut PerspectiveCalibrator) -> R) -> R {
        let ((out, mode), epoch) = self.context.with_calibrator(|cal| {
            let out = f(cal);
            (out, cal.mapping_mode())
        });
        if let Some(epoch) = epoch {
            tracing::debug!("Calibration changed, cache epoch now {epoch} ({mode:?})");
            self.callbacks
                .emit(&PipelineEvent::CalibrationChanged { epoch, mode });
            self.persist();
        }
        out
    }

    // Analysis

    /// Queue a measurement of `region` on the current field
    pub fn submit(
        &self,
        region: Region,
        params: AnalysisParams,
    ) -> Result<TaskHandle, AnalysisError> {
        let version = self.context.fields().current_version().unwrap_or(0);
        self.scheduler
            .submit(AnalysisRequest::new(region, params, version))
    }

    pub fn poll(&self, handle: &TaskHandle) -> TaskStatus {
        self.scheduler.poll(handle)
    }

    pub fn on_result<F>(&self, handle: &TaskHandle, callback: F)
    where
        F: FnOnce(&TaskStatus) + Send + 'static,
    {
        self.scheduler.on_result(handle, callback);
    }

    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    pub fn deregister_callback(&self, id: CallbackId) -> bool {
        self.callbacks.deregister(id)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.context.cache().stats()
    }

    pub fn cache_epoch(&self) -> u64 {
        self.context.cache().epoch()
    }

    // Tutorials

    pub fn has_seen_tutorial(&self, name: &str) -> bool {
        self.lock_tutorials().iter().any(|t| t == name)
    }

    /// Record that a tutorial was shown. Returns false if it already was.
    pub fn mark_tutorial_seen(&self, name: &str) -> bool {
        {
            let mut tutorials = self.lock_tutorials();
            if tutorials.iter().any(|t| t == name) {
                return false;
            }
            tutorials.push(name.to_string());
        }
        self.persist();
        true
    }

    fn lock_tutorials(&self) -> MutexGuard<'_, Vec<String>> {
        self.tutorials.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let tutorials = self.lock_tutorials().clone();
        let record = self
            .context
            .read_calibrator(|cal| cal.to_record(tutorials));
        match storage.save_settings(&record) {
            Ok(path) => tracing::debug!("Saved settings to {}", path.display()),
            Err(e) => tracing::warn!("Failed to save settings: {e}"),
        }
    }

    /// Stop acquisition and the workers. Pending work is finished first.
    pub fn shutdown(&self) {
        if let Some(frames) = self.stop_acquisition() {
            tracing::info!("Acquisition stopped after {frames} frames");
        }
        self.scheduler.shutdown();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
