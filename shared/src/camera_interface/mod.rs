//! Frame acquisition interface for the measurement pipeline
//!
//! A [`FrameSource`] hands out timestamped raw buffers on demand. Real
//! devices, recorded stills and synthetic generators all sit behind the same
//! trait so the pipeline never knows which one it is driving.

pub mod mock;
pub mod still_image;

use ndarray::{Array2, Array3};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Timestamp structure aligned with V4L2 format
/// Represents time as seconds and nanoseconds since an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Seconds component
    pub seconds: u64,
    /// Nanoseconds component (0-999,999,999)
    pub nanos: u64,
}

impl Timestamp {
    pub fn new(seconds: u64, nanos: u64) -> Self {
        Self { seconds, nanos }
    }

    /// Create a timestamp from a Duration since epoch
    pub fn from_duration(duration: Duration) -> Self {
        let total_nanos = duration.as_nanos();
        let seconds = (total_nanos / 1_000_000_000) as u64;
        let nanos = (total_nanos % 1_000_000_000) as u64;
        Self { seconds, nanos }
    }

    /// Wall-clock time since the Unix epoch
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::from_duration)
            .unwrap_or_default()
    }

    pub fn to_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos as u32)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Errors raised by frame sources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    /// The device is gone or not answering; the caller should keep its last
    /// good data and retry later.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A frame was requested but could not be read
    #[error("capture error: {0}")]
    Capture(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CameraError {
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, CameraError::DeviceUnavailable(_))
    }
}

/// Result type for camera operations
pub type CameraResult<T> = Result<T, CameraError>;

/// Raw pixel data as delivered by a source, before normalization.
///
/// Arrays use matrix indexing: `[row, col]` = `[y, x]`.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBuffer {
    /// 8-bit monochrome
    Gray8(Array2<u8>),
    /// High bit-depth monochrome, values in `0..2^bit_depth`
    Gray16 { data: Array2<u16>, bit_depth: u8 },
    /// Interleaved RGB, shape (height, width, 3)
    Rgb8(Array3<u8>),
}

impl FrameBuffer {
    /// Returns (width, height) in pixels
    pub fn dimensions(&self) -> (usize, usize) {
        match self {
            FrameBuffer::Gray8(data) => (data.ncols(), data.nrows()),
            FrameBuffer::Gray16 { data, .. } => (data.ncols(), data.nrows()),
            FrameBuffer::Rgb8(data) => {
                let (h, w, _) = data.dim();
                (w, h)
            }
        }
    }

    /// Largest digital number the buffer format can represent
    pub fn max_value(&self) -> f64 {
        match self {
            FrameBuffer::Gray8(_) | FrameBuffer::Rgb8(_) => u8::MAX as f64,
            FrameBuffer::Gray16 { bit_depth, .. } => {
                let depth = (*bit_depth).clamp(1, 16) as u32;
                ((1u32 << depth) - 1) as f64
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        let (w, h) = self.dimensions();
        w == 0 || h == 0
    }
}

/// One frame pulled from a [`FrameSource`]
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub buffer: FrameBuffer,
    pub timestamp: Timestamp,
    /// Sequence number assigned by the source, starting at 1
    pub frame_number: u64,
}

/// Trait for anything that can supply frames to the pipeline.
///
/// Sources are driven from a single acquisition thread, hence `Send` but not
/// `Sync`.
pub trait FrameSource: Send {
    /// Block until the next frame is available and return it.
    ///
    /// Returns [`CameraError::DeviceUnavailable`] when the device has dropped
    /// out; callers are expected to retry rather than give up.
    fn next_frame(&mut self) -> CameraResult<CapturedFrame>;

    /// Human readable source name for logs
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }
}

impl FrameSource for Box<dyn FrameSource> {
    fn next_frame(&mut self) -> CameraResult<CapturedFrame> {
        (**self).next_frame()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_from_duration() {
        let ts = Timestamp::from_duration(Duration::from_millis(1500));
        assert_eq!(ts.seconds, 1);
        assert_eq!(ts.nanos, 500_000_000);
        assert_eq!(ts.to_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_timestamp_display() {
        let ts = Timestamp::new(12, 34);
        assert_eq!(ts.to_string(), "12.000000034");
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::new(1, 999_999_999) < Timestamp::new(2, 0));
    }

    #[test]
    fn test_buffer_dimensions() {
        let gray = FrameBuffer::Gray8(Array2::zeros((3, 5)));
        assert_eq!(gray.dimensions(), (5, 3));

        let rgb = FrameBuffer::Rgb8(Array3::zeros((4, 6, 3)));
        assert_eq!(rgb.dimensions(), (6, 4));

        let empty = FrameBuffer::Gray8(Array2::zeros((0, 4)));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_buffer_max_value() {
        let b12 = FrameBuffer::Gray16 {
            data: Array2::zeros((1, 1)),
            bit_depth: 12,
        };
        assert_eq!(b12.max_value(), 4095.0);

        let b16 = FrameBuffer::Gray16 {
            data: Array2::zeros((1, 1)),
            bit_depth: 16,
        };
        assert_eq!(b16.max_value(), 65535.0);
        assert_eq!(FrameBuffer::Gray8(Array2::zeros((1, 1))).max_value(), 255.0);
    }

    #[test]
    fn test_device_unavailable_flag() {
        assert!(CameraError::DeviceUnavailable("usb".into()).is_device_unavailable());
        assert!(!CameraError::Capture("short read".into()).is_device_unavailable());
    }
}
