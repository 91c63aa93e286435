//! Test helpers for topometry
//!
//! Synthetic surfaces, frame builders and logging setup shared by the tests
//! across the workspace. Everything here produces plain `ndarray` data or
//! `shared` frame types so the helpers can be used from any crate.

use ndarray::Array2;
use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shared::camera_interface::{CapturedFrame, FrameBuffer, Timestamp};
use std::env;
use std::path::{Path, PathBuf};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
}

/// Returns the path to the workspace root directory.
///
/// Walks up from the current directory until it finds a Cargo.toml that
/// declares a `[workspace]`.
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {e}"))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {e}"))
            })?;

            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// Directory for test artifacts (debug images and the like), created on demand
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }

    output_dir
}

pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// Route `tracing` output through the test harness.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

// Synthetic surfaces. Arrays are (rows, cols) = (height, width).

pub fn constant_surface(width: usize, height: usize, value: f64) -> Array2<f64> {
    Array2::from_elem((height, width), value)
}

/// Plane `z = a*x + b*y + c`
pub fn plane_surface(width: usize, height: usize, a: f64, b: f64, c: f64) -> Array2<f64> {
    Array2::from_shape_fn((height, width), |(y, x)| a * x as f64 + b * y as f64 + c)
}

/// Bowl `z = k * ((x - cx)^2 + (y - cy)^2)` centred in the grid
pub fn paraboloid_surface(width: usize, height: usize, k: f64) -> Array2<f64> {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    Array2::from_shape_fn((height, width), |(y, x)| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        k * (dx * dx + dy * dy)
    })
}

/// Gaussian hill of height `peak` and width `sigma` (pixels) at (`cx`, `cy`)
pub fn gaussian_hill(
    width: usize,
    height: usize,
    cx: f64,
    cy: f64,
    peak: f64,
    sigma: f64,
) -> Array2<f64> {
    let two_sigma2 = 2.0 * sigma * sigma;
    Array2::from_shape_fn((height, width), |(y, x)| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        peak * (-(dx * dx + dy * dy) / two_sigma2).exp()
    })
}

/// Add uniform noise in `[-amplitude, amplitude]` with a fixed seed
pub fn add_noise(surface: &Array2<f64>, amplitude: f64, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    surface.mapv(|v| v + rng.gen_range(-amplitude..=amplitude))
}

/// Quantize a unit-range surface (values clamped to [0, 1]) into 8 bits
pub fn surface_to_gray8(surface: &Array2<f64>) -> FrameBuffer {
    FrameBuffer::Gray8(surface.mapv(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
}

/// Quantize a unit-range surface into a 16-bit buffer of `bit_depth` bits
pub fn surface_to_gray16(surface: &Array2<f64>, bit_depth: u8) -> FrameBuffer {
    let max = ((1u32 << bit_depth) - 1) as f64;
    FrameBuffer::Gray16 {
        data: surface.mapv(|v| (v.clamp(0.0, 1.0) * max).round() as u16),
        bit_depth,
    }
}

/// Wrap a buffer as captured frame number `frame_number`
pub fn captured(buffer: FrameBuffer, frame_number: u64) -> CapturedFrame {
    CapturedFrame {
        buffer,
        timestamp: Timestamp::new(frame_number, 0),
        frame_number,
    }
}
