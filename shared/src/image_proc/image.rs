//! Image format conversion utilities.
//!
//! Conversions between ndarray structures (used by the numeric core) and
//! image crate types (used for file I/O), plus RGB to grayscale reduction.
//!
//! # Coordinate System Conversions
//!
//! - **ndarray**: matrix indexing [row, col] = [y, x] with (height, width) dimensions
//! - **image crate**: graphics indexing (x, y) with (width, height) dimensions

use crate::camera_interface::FrameBuffer;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// How colour channels are collapsed into a single intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrayMode {
    /// ITU-R BT.601 weights: 0.299 R + 0.587 G + 0.114 B
    #[default]
    Luminosity,
    /// Unweighted channel mean
    Average,
}

impl GrayMode {
    pub fn combine(&self, r: u8, g: u8, b: u8) -> f64 {
        let (r, g, b) = (r as f64, g as f64, b as f64);
        match self {
            GrayMode::Luminosity => 0.299 * r + 0.587 * g + 0.114 * b,
            GrayMode::Average => (r + g + b) / 3.0,
        }
    }
}

/// Collapse an (height, width, 3) RGB array into a single-channel intensity array.
///
/// Output values stay in the 0-255 digital number range.
pub fn rgb_to_gray(rgb: &Array3<u8>, mode: GrayMode) -> Array2<f64> {
    let (height, width, _) = rgb.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        mode.combine(rgb[[y, x, 0]], rgb[[y, x, 1]], rgb[[y, x, 2]])
    })
}

/// Convert an image crate GrayImage into `Array2<u8>` with [row, col] indexing.
pub fn gray_image_to_array2(img: &GrayImage) -> Array2<u8> {
    let (width, height) = img.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32).0[0]
    })
}

/// Convert an RgbImage into an (height, width, 3) array.
pub fn rgb_image_to_array3(img: &RgbImage) -> Array3<u8> {
    let (width, height) = img.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        img.get_pixel(x as u32, y as u32).0[c]
    })
}

/// Convert a decoded image into the closest matching [`FrameBuffer`].
///
/// 8-bit and 16-bit luma images keep a single channel; everything else is
/// converted to 8-bit RGB.
pub fn dynamic_image_to_buffer(img: &DynamicImage) -> FrameBuffer {
    match img {
        DynamicImage::ImageLuma8(gray) => FrameBuffer::Gray8(gray_image_to_array2(gray)),
        DynamicImage::ImageLuma16(gray) => {
            let (width, height) = gray.dimensions();
            let data = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                gray.get_pixel(x as u32, y as u32).0[0]
            });
            FrameBuffer::Gray16 {
                data,
                bit_depth: 16,
            }
        }
        other => FrameBuffer::Rgb8(rgb_image_to_array3(&other.to_rgb8())),
    }
}

/// Convert a `[0, 1]` scalar field into an 8-bit GrayImage for export.
///
/// Values outside the unit range are clamped.
pub fn unit_field_to_gray_image(field: &Array2<f64>) -> GrayImage {
    let (height, width) = field.dim();
    ImageBuffer::<Luma<u8>, Vec<u8>>::from_fn(width as u32, height as u32, |x, y| {
        let value = field[[y as usize, x as usize]];
        let clamped = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Luma([(clamped * 255.0).round() as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two by two RGB test pattern
    fn sample_rgb() -> Array3<u8> {
        let values = [
            [[10, 20, 30], [200, 150, 100]],
            [[50, 60, 70], [0, 255, 128]],
        ];
        Array3::from_shape_fn((2, 2, 3), |(y, x, c)| values[y][x][c])
    }

    #[test]
    fn test_gray_average() {
        let gray = rgb_to_gray(&sample_rgb(), GrayMode::Average);
        assert_eq!(gray.dim(), (2, 2));
        assert_relative_eq!(gray[[0, 0]], 20.0);
        assert_relative_eq!(gray[[0, 1]], 150.0);
    }

    #[test]
    fn test_gray_luminosity() {
        let gray = rgb_to_gray(&sample_rgb(), GrayMode::Luminosity);
        assert_eq!(gray.dim(), (2, 2));
        assert_relative_eq!(gray[[0, 0]], 0.299 * 10.0 + 0.587 * 20.0 + 0.114 * 30.0);
        // Pure green carries most of the luminance weight
        assert!(gray[[1, 1]] > rgb_to_gray(&sample_rgb(), GrayMode::Average)[[1, 1]]);
    }

    #[test]
    fn test_gray_image_orientation() {
        let mut img = GrayImage::new(3, 2);
        img.put_pixel(2, 0, Luma([99]));
        let arr = gray_image_to_array2(&img);
        assert_eq!(arr.dim(), (2, 3));
        assert_eq!(arr[[0, 2]], 99);
    }

    #[test]
    fn test_dynamic_image_to_buffer_keeps_luma() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 3, Luma([5])));
        match dynamic_image_to_buffer(&img) {
            FrameBuffer::Gray8(data) => {
                assert_eq!(data.dim(), (3, 4));
                assert!(data.iter().all(|&v| v == 5));
            }
            other => panic!("expected Gray8, got {other:?}"),
        }
    }

    #[test]
    fn test_dynamic_image_rgb_passthrough() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3])));
        match dynamic_image_to_buffer(&img) {
            FrameBuffer::Rgb8(data) => {
                assert_eq!(data.dim(), (2, 2, 3));
                assert_eq!(data[[1, 1, 2]], 3);
            }
            other => panic!("expected Rgb8, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_field_export_clamps() {
        let field = Array2::from_shape_vec((1, 3), vec![-1.0, 0.5, 2.0]).unwrap();
        let img = unit_field_to_gray_image(&field);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 128);
        assert_eq!(img.get_pixel(2, 0).0[0], 255);
    }
}
