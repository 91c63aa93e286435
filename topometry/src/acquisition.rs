//! Producer thread: frame source -> preprocessor -> field slot.

use crate::callback::{CallbackRegistry, PipelineEvent};
use crate::field::FieldSlot;
use crate::preprocess::Preprocessor;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use shared::camera_interface::{CameraError, CapturedFrame, FrameSource};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Counters maintained by the acquisition thread
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    pub frames_published: AtomicU64,
    pub device_errors: AtomicU64,
    pub capture_errors: AtomicU64,
    pub preprocess_errors: AtomicU64,
    degraded: AtomicBool,
}

impl AcquisitionStats {
    /// Whether the source is currently in an outage
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

/// Running acquisition thread. Stops and joins on drop.
pub struct AcquisitionHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<AcquisitionStats>,
}

impl AcquisitionHandle {
    pub fn stats(&self) -> &Arc<AcquisitionStats> {
        &self.stats
    }

    pub fn frames_published(&self) -> u64 {
        self.stats.frames_published.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Acquisition thread panicked");
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Acquisition {
    source: Box<dyn FrameSource>,
    preprocessor: Arc<dyn Preprocessor>,
    fields: Arc<FieldSlot>,
    callbacks: Arc<CallbackRegistry>,
    retry: Duration,
    stats: Arc<AcquisitionStats>,
}

/// Start pulling frames from `source` on a dedicated thread.
///
/// While the device is unavailable the last published field stays current,
/// a single `DeviceDegraded` event is emitted per outage and the source is
/// retried every `retry`.
pub fn spawn_acquisition(
    source: Box<dyn FrameSource>,
    preprocessor: Arc<dyn Preprocessor>,
    fields: Arc<FieldSlot>,
    callbacks: Arc<CallbackRegistry>,
    retry: Duration,
) -> std::io::Result<AcquisitionHandle> {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let stats = Arc::new(AcquisitionStats::default());

    let acquisition = Acquisition {
        source,
        preprocessor,
        fields,
        callbacks,
        retry,
        stats: stats.clone(),
    };
    let thread = std::thread::Builder::new()
        .name("frame-acquisition".to_string())
        .spawn(move || acquisition.run(stop_rx))?;

    Ok(AcquisitionHandle {
        stop: Some(stop_tx),
        thread: Some(thread),
        stats,
    })
}

impl Acquisition {
    fn run(mut self, stop: Receiver<()>) {
        tracing::info!("Acquisition started on source '{}'", self.source.name());

        while let Err(TryRecvError::Empty) = stop.try_recv() {
            let pause = match self.source.next_frame() {
                Ok(frame) => {
                    self.publish(&frame);
                    None
                }
                Err(CameraError::DeviceUnavailable(reason)) => {
                    self.stats.device_errors.fetch_add(1, Ordering::SeqCst);
                    if !self.stats.degraded.swap(true, Ordering::SeqCst) {
                        let last_good_version = self.fields.current_version();
                        tracing::warn!(
                            "Source '{}' unavailable ({reason}); holding field {:?}",
                            self.source.name(),
                            last_good_version
                        );
                        self.callbacks.emit(&PipelineEvent::DeviceDegraded {
                            reason,
                            last_good_version,
                        });
                    }
                    Some(self.retry)
                }
                Err(e) => {
                    self.stats.capture_errors.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!("Capture from '{}' failed: {e}", self.source.name());
                    Some(self.retry)
                }
            };

            if let Some(pause) = pause {
                match stop.recv_timeout(pause) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        }

        tracing::info!(
            "Acquisition stopped after {} frames",
            self.stats.frames_published.load(Ordering::SeqCst)
        );
    }

    fn publish(&self, frame: &CapturedFrame) {
        let field = match self.preprocessor.normalize(frame) {
            Ok(field) => field,
            Err(e) => {
                self.stats.preprocess_errors.fetch_add(1, Ordering::SeqCst);
                tracing::warn!("Dropping frame {}: {e}", frame.frame_number);
                return;
            }
        };

        let version = field.version();
        let timestamp = field.timestamp();
        if !self.fields.publish(field) {
            return;
        }
        self.stats.frames_published.fetch_add(1, Ordering::SeqCst);

        if self.stats.degraded.swap(false, Ordering::SeqCst) {
            tracing::info!("Source '{}' recovered at field v{version}", self.source.name());
            self.callbacks
                .emit(&PipelineEvent::DeviceRecovered { version });
        }
        self.callbacks
            .emit(&PipelineEvent::FramePublished { version, timestamp });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;
    use crate::preprocess::IntensityPreprocessor;
    use ndarray::Array2;
    use shared::camera_interface::mock::MockFrameSource;
    use shared::camera_interface::FrameBuffer;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn setup() -> (Arc<FieldSlot>, Arc<CallbackRegistry>, Arc<Mutex<Vec<String>>>) {
        let fields = Arc::new(FieldSlot::new());
        let callbacks = Arc::new(CallbackRegistry::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        callbacks.register(move |event| {
            let name = match event {
                PipelineEvent::DeviceDegraded { .. } => "degraded",
                PipelineEvent::DeviceRecovered { .. } => "recovered",
                PipelineEvent::FramePublished { .. } => "frame",
                _ => "other",
            };
            e.lock().unwrap().push(name.to_string());
        });
        (fields, callbacks, events)
    }

    #[test]
    fn test_publishes_frames() {
        let (fields, callbacks, _) = setup();
        let source = MockFrameSource::new_repeating(FrameBuffer::Gray8(Array2::from_elem((4, 4), 9)));
        let mut handle = spawn_acquisition(
            Box::new(source),
            Arc::new(IntensityPreprocessor::new(PreprocessConfig::default())),
            fields.clone(),
            callbacks,
            Duration::from_millis(5),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || handle.frames_published() >= 3));
        handle.stop();
        assert!(!handle.is_running());
        assert!(fields.current_version().unwrap() >= 3);
    }

    #[test]
    fn test_outage_keeps_last_field_and_signals_once() {
        let (fields, callbacks, events) = setup();
        let frames = vec![
            FrameBuffer::Gray8(Array2::from_elem((4, 4), 1)),
            FrameBuffer::Gray8(Array2::from_elem((4, 4), 2)),
        ];
        // Two frames, then the exhausted sequence reports the device unavailable
        let source = MockFrameSource::new(frames);
        let mut handle = spawn_acquisition(
            Box::new(source),
            Arc::new(IntensityPreprocessor::new(PreprocessConfig::default())),
            fields.clone(),
            callbacks,
            Duration::from_millis(2),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            handle.stats().device_errors.load(Ordering::SeqCst) >= 5
        }));
        handle.stop();

        assert_eq!(fields.current_version(), Some(2));
        let events = events.lock().unwrap();
        assert_eq!(events.iter().filter(|e| *e == "degraded").count(), 1);
        assert_eq!(events.iter().filter(|e| *e == "frame").count(), 2);
        assert!(handle.stats().is_degraded());
    }

    #[test]
    fn test_recovery_after_outage() {
        let (fields, callbacks, events) = setup();
        let mut source =
            MockFrameSource::new_repeating(FrameBuffer::Gray8(Array2::from_elem((2, 2), 5)));
        source.fail_next(3, "cable pulled");
        let mut handle = spawn_acquisition(
            Box::new(source),
            Arc::new(IntensityPreprocessor::new(PreprocessConfig::default())),
            fields.clone(),
            callbacks,
            Duration::from_millis(1),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || handle.frames_published() >= 2));
        handle.stop();

        let events = events.lock().unwrap();
        let degraded = events.iter().position(|e| e == "degraded").unwrap();
        let recovered = events.iter().position(|e| e == "recovered").unwrap();
        assert!(degraded < recovered);
        assert_eq!(events.iter().filter(|e| *e == "degraded").count(), 1);
        assert!(!handle.stats().is_degraded());
    }
}
