use super::{CameraError, CameraResult, CapturedFrame, FrameBuffer, FrameSource, Timestamp};
use std::collections::VecDeque;
use std::time::Duration;

/// Scripted outcome for an upcoming `next_frame` call
#[derive(Debug, Clone)]
enum Scripted {
    Unavailable(String),
    CaptureFailure(String),
}

/// In-memory frame source for tests and demos.
///
/// Replays a fixed list of frames (or repeats a single one forever) with
/// synthetic timestamps spaced `frame_interval` apart. Failures can be
/// scripted ahead of time to exercise degraded-device handling.
pub struct MockFrameSource {
    name: String,
    frames: Vec<FrameBuffer>,
    frame_index: usize,
    frame_count: u64,
    frame_interval: Duration,
    elapsed_time: Duration,
    script: VecDeque<Scripted>,
}

impl MockFrameSource {
    /// Replay `frames` once, in order, then report the source as unavailable.
    ///
    /// A single-frame list is repeated indefinitely.
    pub fn new(frames: Vec<FrameBuffer>) -> Self {
        Self {
            name: "mock".to_string(),
            frames,
            frame_index: 0,
            frame_count: 0,
            frame_interval: Duration::from_millis(33),
            elapsed_time: Duration::ZERO,
            script: VecDeque::new(),
        }
    }

    pub fn new_repeating(frame: FrameBuffer) -> Self {
        Self::new(vec![frame])
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Make the next `count` calls fail with `DeviceUnavailable`
    pub fn fail_next(&mut self, count: usize, reason: &str) {
        for _ in 0..count {
            self.script
                .push_back(Scripted::Unavailable(reason.to_string()));
        }
    }

    /// Make the next call fail with a capture error
    pub fn fail_capture_once(&mut self, reason: &str) {
        self.script
            .push_back(Scripted::CaptureFailure(reason.to_string()));
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frame_count
    }

    pub fn reset(&mut self) {
        self.frame_index = 0;
        self.frame_count = 0;
        self.elapsed_time = Duration::ZERO;
        self.script.clear();
    }

    fn generate_frame(&mut self) -> CameraResult<FrameBuffer> {
        if self.frames.is_empty() {
            return Err(CameraError::Config("no frames loaded".to_string()));
        }

        let frame_idx = if self.frames.len() == 1 {
            0
        } else {
            if self.frame_index >= self.frames.len() {
                return Err(CameraError::DeviceUnavailable(
                    "frame sequence exhausted".to_string(),
                ));
            }
            let current = self.frame_index;
            self.frame_index += 1;
            current
        };

        Ok(self.frames[frame_idx].clone())
    }
}

impl FrameSource for MockFrameSource {
    fn next_frame(&mut self) -> CameraResult<CapturedFrame> {
        if let Some(scripted) = self.script.pop_front() {
            return Err(match scripted {
                Scripted::Unavailable(reason) => CameraError::DeviceUnavailable(reason),
                Scripted::CaptureFailure(reason) => CameraError::Capture(reason),
            });
        }

        let buffer = self.generate_frame()?;
        self.elapsed_time += self.frame_interval;
        self.frame_count += 1;

        Ok(CapturedFrame {
            buffer,
            timestamp: Timestamp::from_duration(self.elapsed_time),
            frame_number: self.frame_count,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        !self.frames.is_empty()
    }
}
