//! Synthetic moving-surface frame source
//!
//! Renders a Gaussian hill that circles the frame centre over a tilted base
//! plane, with optional sensor noise and scheduled device dropouts. Frames
//! are 12-bit grayscale, so they exercise the same normalization path as a
//! real monochrome camera.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shared::camera_interface::{
    CameraError, CameraResult, CapturedFrame, FrameBuffer, FrameSource, Timestamp,
};
use std::time::Duration;

const BIT_DEPTH: u8 = 12;

/// Shape and motion of the rendered surface
#[derive(Debug, Clone)]
pub struct SurfaceParams {
    pub width: usize,
    pub height: usize,
    /// Hill height as a fraction of full scale
    pub peak: f64,
    /// Hill width in pixels
    pub sigma: f64,
    /// Radius of the hill's circular path in pixels
    pub orbit_radius: f64,
    /// Orbit period in frames
    pub orbit_frames: u64,
    /// Base plane slope along x, full scale per pixel
    pub tilt: f64,
    /// Uniform noise amplitude, full scale
    pub noise: f64,
    pub seed: u64,
}

impl Default for SurfaceParams {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            peak: 0.6,
            sigma: 25.0,
            orbit_radius: 60.0,
            orbit_frames: 120,
            tilt: 0.0005,
            noise: 0.005,
            seed: 42,
        }
    }
}

/// Recurring outage: after every `every` good frames the device is
/// unavailable for `length` calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dropout {
    pub every: u64,
    pub length: u64,
}

pub struct SyntheticSurfaceSource {
    params: SurfaceParams,
    dropout: Option<Dropout>,
    frame_interval: Duration,
    realtime: bool,
    rng: ChaCha8Rng,
    frame_number: u64,
    elapsed: Duration,
    outage_remaining: u64,
    /// Good frames since the last outage
    good_run: u64,
}

impl SyntheticSurfaceSource {
    pub fn new(params: SurfaceParams) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(params.seed);
        Self {
            params,
            dropout: None,
            frame_interval: Duration::from_millis(33),
            realtime: false,
            rng,
            frame_number: 0,
            elapsed: Duration::ZERO,
            outage_remaining: 0,
            good_run: 0,
        }
    }

    pub fn with_dropout(mut self, dropout: Dropout) -> Self {
        self.dropout = Some(dropout);
        self
    }

    /// Sleep one frame interval per frame, like a real device
    pub fn with_frame_rate(mut self, fps: f64, realtime: bool) -> Self {
        if fps > 0.0 {
            self.frame_interval = Duration::from_secs_f64(1.0 / fps);
        }
        self.realtime = realtime;
        self
    }

    pub fn params(&self) -> &SurfaceParams {
        &self.params
    }

    /// Hill centre for frame `frame_number`
    pub fn hill_center(&self, frame_number: u64) -> (f64, f64) {
        let p = &self.params;
        let phase =
            2.0 * std::f64::consts::PI * frame_number as f64 / p.orbit_frames.max(1) as f64;
        let cx = p.width as f64 / 2.0 + p.orbit_radius * phase.cos();
        let cy = p.height as f64 / 2.0 + p.orbit_radius * phase.sin();
        (cx, cy)
    }

    /// Noise-free surface for frame `frame_number`, full scale = 1.0
    pub fn render(&self, frame_number: u64) -> Array2<f64> {
        let p = &self.params;
        let (cx, cy) = self.hill_center(frame_number);
        let two_sigma2 = 2.0 * p.sigma * p.sigma;
        Array2::from_shape_fn((p.height, p.width), |(y, x)| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            p.tilt * x as f64 + p.peak * (-(dx * dx + dy * dy) / two_sigma2).exp()
        })
    }

    fn quantize(&mut self, surface: Array2<f64>) -> Array2<u16> {
        let max = ((1u32 << BIT_DEPTH) - 1) as f64;
        let noise = self.params.noise;
        surface.mapv(|v| {
            let n = if noise > 0.0 {
                self.rng.gen_range(-noise..=noise)
            } else {
                0.0
            };
            ((v + n).clamp(0.0, 1.0) * max).round() as u16
        })
    }

    fn in_outage(&mut self) -> bool {
        let Some(dropout) = self.dropout else {
            return false;
        };
        if self.outage_remaining > 0 {
            self.outage_remaining -= 1;
            return true;
        }
        if dropout.every > 0 && dropout.length > 0 && self.good_run >= dropout.every {
            self.good_run = 0;
            self.outage_remaining = dropout.length - 1;
            return true;
        }
        false
    }
}

impl FrameSource for SyntheticSurfaceSource {
    fn next_frame(&mut self) -> CameraResult<CapturedFrame> {
        if self.realtime {
            std::thread::sleep(self.frame_interval);
        }
        if self.in_outage() {
            return Err(CameraError::DeviceUnavailable(
                "synthetic dropout".to_string(),
            ));
        }

        let surface = self.render(self.frame_number);
        let data = self.quantize(surface);
        self.frame_number += 1;
        self.good_run += 1;
        self.elapsed += self.frame_interval;

        Ok(CapturedFrame {
            buffer: FrameBuffer::Gray16 {
                data,
                bit_depth: BIT_DEPTH,
            },
            timestamp: Timestamp::from_duration(self.elapsed),
            frame_number: self.frame_number,
        })
    }

    fn name(&self) -> &str {
        "synthetic-surface"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quiet() -> SurfaceParams {
        SurfaceParams {
            width: 64,
            height: 48,
            noise: 0.0,
            orbit_radius: 10.0,
            sigma: 5.0,
            ..SurfaceParams::default()
        }
    }

    #[test]
    fn test_frames_are_twelve_bit() {
        let mut source = SyntheticSurfaceSource::new(quiet());
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.frame_number, 1);
        match frame.buffer {
            FrameBuffer::Gray16 { data, bit_depth } => {
                assert_eq!(bit_depth, 12);
                assert_eq!(data.dim(), (48, 64));
                assert!(data.iter().all(|&v| v <= 4095));
            }
            other => panic!("unexpected buffer {other:?}"),
        }
    }

    #[test]
    fn test_hill_peaks_at_orbit_position() {
        let source = SyntheticSurfaceSource::new(SurfaceParams {
            tilt: 0.0,
            ..quiet()
        });
        let (cx, cy) = source.hill_center(0);
        assert_relative_eq!(cx, 42.0);
        assert_relative_eq!(cy, 24.0);
        let surface = source.render(0);
        assert_relative_eq!(surface[[24, 42]], 0.6);
    }

    #[test]
    fn test_hill_moves_between_frames() {
        let source = SyntheticSurfaceSource::new(quiet());
        assert_ne!(source.hill_center(0), source.hill_center(30));
    }

    #[test]
    fn test_dropout_schedule() {
        let mut source =
            SyntheticSurfaceSource::new(quiet()).with_dropout(Dropout { every: 3, length: 2 });
        let outcomes: Vec<bool> = (0..8).map(|_| source.next_frame().is_ok()).collect();
        assert_eq!(
            outcomes,
            vec![true, true, true, false, false, true, true, true]
        );
    }

    #[test]
    fn test_noise_is_reproducible() {
        let params = SurfaceParams {
            noise: 0.05,
            ..quiet()
        };
        let a = SyntheticSurfaceSource::new(params.clone()).next_frame().unwrap();
        let b = SyntheticSurfaceSource::new(params).next_frame().unwrap();
        assert_eq!(a.buffer, b.buffer);
    }
}
