use crate::field::Region;
use thiserror::Error;

/// Errors raised by the perspective calibrator.
///
/// All of these are recoverable: the calibrator state is left exactly as it
/// was before the failing call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Operation is not legal in the current calibration state.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        /// Operation that was attempted.
        operation: &'static str,
        /// Name of the state the calibrator was in.
        state: &'static str,
    },

    /// A calibration point had non-finite coordinates.
    #[error("invalid calibration point ({x}, {y})")]
    InvalidPoint { x: f64, y: f64 },

    /// Real-world reference dimensions were not strictly positive.
    #[error("reference dimensions must be positive, got {width} x {height}")]
    InvalidDimensions { width: f64, height: f64 },

    /// The four points cannot define a perspective mapping.
    #[error("degenerate point configuration: {0}")]
    Degenerate(String),

    /// The solved homography could not be inverted.
    #[error("homography is singular")]
    Singular,

    #[error("scale must be positive and finite, got {0}")]
    InvalidScale(f64),
}

/// Errors raised while validating or executing an analysis request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Region is not fully contained in the current field.
    #[error("region {region} lies outside the {width}x{height} field")]
    RegionOutOfBounds {
        region: Region,
        width: usize,
        height: usize,
    },

    /// Too few samples along an axis the measurement needs.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid analysis parameters: {0}")]
    InvalidParams(String),

    /// Region exceeds the configured interactive size limit.
    #[error("region of {pixels} samples exceeds limit of {limit}")]
    RegionTooLarge { pixels: usize, limit: usize },

    /// No frame has been normalized yet.
    #[error("no scalar field has been published")]
    NoField,

    /// The measurement itself failed or panicked.
    #[error("computation failed: {0}")]
    Computation(String),

    #[error("scheduler has shut down")]
    ShutDown,
}

/// Errors raised while normalizing a raw frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("frame has no pixels")]
    EmptyFrame,

    /// Buffer declares a bit depth the format cannot hold
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u8),
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures surfaced by the [`crate::pipeline::Pipeline`] facade.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error("frame acquisition is already running")]
    AcquisitionRunning,

    /// A background thread could not be started
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
}
