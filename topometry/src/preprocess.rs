//! Raw frame to scalar field normalization.

use crate::config::{IntensityRange, PreprocessConfig};
use crate::error::PreprocessError;
use crate::field::ScalarField;
use ndarray::{s, Array2};
use shared::camera_interface::{CapturedFrame, FrameBuffer};
use shared::image_proc::image::rgb_to_gray;
use std::sync::atomic::{AtomicU64, Ordering};

/// Converts raw frames into versioned scalar fields.
///
/// Implementations assign strictly increasing versions, one per normalized
/// frame.
pub trait Preprocessor: Send + Sync {
    fn normalize(&self, frame: &CapturedFrame) -> Result<ScalarField, PreprocessError>;
}

/// Intensity-as-height preprocessor.
///
/// Collapses colour to a single channel, rescales into the configured range
/// and applies orientation flips.
pub struct IntensityPreprocessor {
    config: PreprocessConfig,
    last_version: AtomicU64,
}

impl IntensityPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            last_version: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Version assigned to the most recent field, 0 before the first frame
    pub fn last_version(&self) -> u64 {
        self.last_version.load(Ordering::SeqCst)
    }

    fn to_intensity(&self, buffer: &FrameBuffer) -> Result<Array2<f64>, PreprocessError> {
        let raw = match buffer {
            FrameBuffer::Gray8(data) => data.mapv(|v| v as f64),
            FrameBuffer::Gray16 { data, bit_depth } => {
                if *bit_depth == 0 || *bit_depth > 16 {
                    return Err(PreprocessError::UnsupportedBitDepth(*bit_depth));
                }
                data.mapv(|v| v as f64)
            }
            FrameBuffer::Rgb8(data) => rgb_to_gray(data, self.config.gray_mode),
        };

        Ok(match self.config.intensity_range {
            IntensityRange::Unit => {
                let max = buffer.max_value();
                raw.mapv(|v| (v / max).min(1.0))
            }
            IntensityRange::Native => raw,
        })
    }

    fn orient(&self, data: Array2<f64>) -> Array2<f64> {
        match (self.config.flip_horizontal, self.config.flip_vertical) {
            (false, false) => data,
            (true, false) => data.slice(s![.., ..;-1]).to_owned(),
            (false, true) => data.slice(s![..;-1, ..]).to_owned(),
            (true, true) => data.slice(s![..;-1, ..;-1]).to_owned(),
        }
    }
}

impl Preprocessor for IntensityPreprocessor {
    fn normalize(&self, frame: &CapturedFrame) -> Result<ScalarField, PreprocessError> {
        if frame.buffer.is_empty() {
            return Err(PreprocessError::EmptyFrame);
        }

        let data = self.orient(self.to_intensity(&frame.buffer)?);
        let version = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(ScalarField::new(data, version, frame.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use shared::camera_interface::Timestamp;
    use shared::image_proc::image::GrayMode;

    fn frame(buffer: FrameBuffer) -> CapturedFrame {
        CapturedFrame {
            buffer,
            timestamp: Timestamp::new(1, 0),
            frame_number: 1,
        }
    }

    #[test]
    fn test_versions_strictly_increase() {
        let pre = IntensityPreprocessor::new(PreprocessConfig::default());
        let f = frame(FrameBuffer::Gray8(Array2::zeros((2, 2))));

        let versions: Vec<u64> = (0..4).map(|_| pre.normalize(&f).unwrap().version()).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(pre.last_version(), 4);
    }

    #[test]
    fn test_unit_range_scales_by_format_maximum() {
        let pre = IntensityPreprocessor::new(PreprocessConfig::default());

        let gray = pre
            .normalize(&frame(FrameBuffer::Gray8(Array2::from_elem((2, 2), 255))))
            .unwrap();
        assert_relative_eq!(gray.data()[[0, 0]], 1.0);

        let deep = pre
            .normalize(&frame(FrameBuffer::Gray16 {
                data: Array2::from_elem((2, 2), 2048),
                bit_depth: 12,
            }))
            .unwrap();
        assert_relative_eq!(deep.data()[[1, 1]], 2048.0 / 4095.0);
    }

    #[test]
    fn test_native_range_keeps_digital_numbers() {
        let config = PreprocessConfig {
            intensity_range: IntensityRange::Native,
            ..Default::default()
        };
        let pre = IntensityPreprocessor::new(config);
        let field = pre
            .normalize(&frame(FrameBuffer::Gray8(Array2::from_elem((1, 3), 17))))
            .unwrap();
        assert_eq!(field.data()[[0, 2]], 17.0);
    }

    #[test]
    fn test_rgb_uses_gray_mode() {
        let config = PreprocessConfig {
            gray_mode: GrayMode::Average,
            intensity_range: IntensityRange::Native,
            ..Default::default()
        };
        let pre = IntensityPreprocessor::new(config);
        let mut rgb = Array3::zeros((1, 1, 3));
        rgb[[0, 0, 0]] = 30;
        rgb[[0, 0, 1]] = 60;
        rgb[[0, 0, 2]] = 90;

        let field = pre.normalize(&frame(FrameBuffer::Rgb8(rgb))).unwrap();
        assert_relative_eq!(field.data()[[0, 0]], 60.0);
    }

    #[test]
    fn test_flips_reorient() {
        let data = Array2::from_shape_vec((2, 2), vec![1u8, 2, 3, 4]).unwrap();
        let config = PreprocessConfig {
            intensity_range: IntensityRange::Native,
            flip_horizontal: true,
            flip_vertical: true,
            ..Default::default()
        };
        let pre = IntensityPreprocessor::new(config);
        let field = pre.normalize(&frame(FrameBuffer::Gray8(data))).unwrap();
        assert_eq!(field.data()[[0, 0]], 4.0);
        assert_eq!(field.data()[[1, 1]], 1.0);
    }

    #[test]
    fn test_empty_frame_rejected_without_consuming_version() {
        let pre = IntensityPreprocessor::new(PreprocessConfig::default());
        let err = pre
            .normalize(&frame(FrameBuffer::Gray8(Array2::zeros((0, 0)))))
            .unwrap_err();
        assert_eq!(err, PreprocessError::EmptyFrame);
        assert_eq!(pre.last_version(), 0);
    }
}
