//! Common utilities for topometry integration tests

#![allow(dead_code)]

use ndarray::{Array2, ArrayView2};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use topometry::calculus::{CalculusEngine, MeasurementEngine, Spacing};
use topometry::{AnalysisError, AnalysisOutput, AnalysisParams, Pipeline, PipelineConfig};

pub const WAIT: Duration = Duration::from_secs(10);

/// Engine that counts invocations and records the z factor of each call
/// before delegating to the real calculus
#[derive(Default)]
pub struct CountingEngine {
    calls: AtomicUsize,
    z_factors: Mutex<Vec<f64>>,
}

impl CountingEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn z_factors(&self) -> Vec<f64> {
        self.z_factors.lock().unwrap().clone()
    }
}

impl MeasurementEngine for CountingEngine {
    fn measure(
        &self,
        samples: ArrayView2<f64>,
        params: &AnalysisParams,
        spacing: Spacing,
    ) -> Result<AnalysisOutput, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.z_factors.lock().unwrap().push(params.z_factor);
        CalculusEngine.measure(samples, params, spacing)
    }
}

/// Engine that blocks every call whose z factor equals `gated_z` until
/// `release()` is called. Other calls go straight through.
pub struct GatedEngine {
    gated_z: f64,
    open: Mutex<bool>,
    changed: Condvar,
    entered: AtomicUsize,
    pub inner: CountingEngine,
}

impl GatedEngine {
    pub fn new(gated_z: f64) -> Self {
        Self {
            gated_z,
            open: Mutex::new(false),
            changed: Condvar::new(),
            entered: AtomicUsize::new(0),
            inner: CountingEngine::default(),
        }
    }

    pub fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    /// Block until a gated call is parked inside the engine
    pub fn wait_entered(&self, count: usize) {
        assert!(
            wait_until(WAIT, || self.entered.load(Ordering::SeqCst) >= count),
            "gated call never started"
        );
    }
}

impl MeasurementEngine for GatedEngine {
    fn measure(
        &self,
        samples: ArrayView2<f64>,
        params: &AnalysisParams,
        spacing: Spacing,
    ) -> Result<AnalysisOutput, AnalysisError> {
        if params.z_factor == self.gated_z {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let open = self.open.lock().unwrap();
            let _open = self
                .changed
                .wait_timeout_while(open, WAIT, |open| !*open)
                .unwrap();
        }
        self.inner.measure(samples, params, spacing)
    }
}

/// Engine that panics on gradient requests
pub struct PanickingEngine;

impl MeasurementEngine for PanickingEngine {
    fn measure(
        &self,
        samples: ArrayView2<f64>,
        params: &AnalysisParams,
        spacing: Spacing,
    ) -> Result<AnalysisOutput, AnalysisError> {
        if params.kind == topometry::AnalysisKind::Gradient {
            panic!("gradient kernel exploded");
        }
        CalculusEngine.measure(samples, params, spacing)
    }
}

pub fn single_worker_config() -> PipelineConfig {
    PipelineConfig {
        worker_threads: 1,
        ..PipelineConfig::default()
    }
}

/// Publish `surface` (unit range) as the next frame
pub fn publish_surface(pipeline: &Pipeline, surface: &Array2<f64>) -> u64 {
    let frame = test_helpers::captured(test_helpers::surface_to_gray16(surface, 16), 0);
    pipeline.publish_frame(&frame).unwrap()
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn engine_arc<E: MeasurementEngine + 'static>(engine: &Arc<E>) -> Arc<dyn MeasurementEngine> {
    engine.clone()
}
