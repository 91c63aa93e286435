use super::{CameraError, CameraResult, CapturedFrame, FrameBuffer, FrameSource, Timestamp};
use crate::image_proc::image::dynamic_image_to_buffer;
use std::path::Path;
use std::time::Duration;

/// Serves a single decoded image file as an endless stream of identical frames.
///
/// Useful for measuring a photograph offline with the same pipeline that
/// drives a live camera. Frames after the first are paced `frame_interval`
/// apart.
pub struct StillImageSource {
    name: String,
    buffer: FrameBuffer,
    frame_count: u64,
    frame_interval: Duration,
}

impl StillImageSource {
    pub fn open(path: &Path) -> CameraResult<Self> {
        let img = image::open(path)
            .map_err(|e| CameraError::Config(format!("failed to open {}: {e}", path.display())))?;
        let buffer = dynamic_image_to_buffer(&img);
        tracing::info!(
            "Loaded still image {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        Ok(Self::from_buffer(path.display().to_string(), buffer))
    }

    pub fn from_buffer(name: impl Into<String>, buffer: FrameBuffer) -> Self {
        Self {
            name: name.into(),
            buffer,
            frame_count: 0,
            frame_interval: Duration::from_millis(100),
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// (width, height) of the served image
    pub fn dimensions(&self) -> (usize, usize) {
        self.buffer.dimensions()
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> CameraResult<CapturedFrame> {
        if self.frame_count > 0 && !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        self.frame_count += 1;
        Ok(CapturedFrame {
            buffer: self.buffer.clone(),
            timestamp: Timestamp::now(),
            frame_number: self.frame_count,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_open_png_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.png");
        GrayImage::from_pixel(6, 4, Luma([42])).save(&path).unwrap();

        let mut source = StillImageSource::open(&path).unwrap();
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();

        assert_eq!(first.buffer.dimensions(), (6, 4));
        assert_eq!(first.buffer, second.buffer);
        assert_eq!(second.frame_number, 2);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = StillImageSource::open(Path::new("/nonexistent/surface.png"));
        assert!(matches!(result, Err(CameraError::Config(_))));
    }
}
