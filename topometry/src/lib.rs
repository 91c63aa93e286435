//! TOPOMETRY - calibrated surface measurements over a live scalar field.
//!
//! Frames from a [`shared::camera_interface::FrameSource`] are normalized
//! into versioned [`field::ScalarField`]s. Measurements (gradient, volume,
//! arc length) run on worker threads through a perspective calibration,
//! results are cached per calibration epoch, and newer requests for the same
//! region supersede queued ones.

pub mod acquisition;
pub mod cache;
pub mod calculus;
pub mod calibration;
pub mod callback;
pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod pipeline;
pub mod preprocess;
pub mod request;
pub mod scheduler;

// Re-export commonly used types for external use
pub use crate::callback::{CallbackId, PipelineEvent};
pub use crate::calibration::{CalibrationState, MappingMode, PerspectiveCalibrator};
pub use crate::config::PipelineConfig;
pub use crate::error::{AnalysisError, CalibrationError, PipelineError};
pub use crate::field::{Region, ScalarField};
pub use crate::pipeline::Pipeline;
pub use crate::request::{AnalysisKind, AnalysisOutput, AnalysisParams, AnalysisResult};
pub use crate::scheduler::{TaskHandle, TaskStatus};
