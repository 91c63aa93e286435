use crate::calibration::MappingMode;
use crate::request::{AnalysisResult, RequestIdentity};
use shared::camera_interface::Timestamp;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Identifier handed out with each [`crate::scheduler::TaskHandle`]
pub type HandleId = u64;

/// Events emitted for external callbacks
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A new field replaced the current one
    FramePublished { version: u64, timestamp: Timestamp },
    /// A handle resolved with a result (possibly a failure marker)
    ResultReady {
        handle_id: HandleId,
        result: Arc<AnalysisResult>,
    },
    /// A queued request was replaced before it started
    Superseded {
        handle_id: HandleId,
        identity: RequestIdentity,
    },
    /// Frame source stopped answering; measurements continue on the last good field
    DeviceDegraded {
        reason: String,
        last_good_version: Option<u64>,
    },
    /// Frames are flowing again
    DeviceRecovered { version: u64 },
    /// Effective calibration changed and the cache moved to a new epoch
    CalibrationChanged { epoch: u64, mode: MappingMode },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type PipelineCallback = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Registry of event listeners shared between the pipeline's threads
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Mutex<HashMap<CallbackId, PipelineCallback>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback to receive pipeline events.
    ///
    /// Callbacks run on whichever thread produced the event (acquisition,
    /// worker or caller) and must not block for long.
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        id
    }

    pub fn deregister(&self, id: CallbackId) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every registered callback.
    ///
    /// The registry lock is released before callbacks run, so a callback may
    /// register or deregister listeners.
    pub fn emit(&self, event: &PipelineEvent) {
        let callbacks: Vec<PipelineCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_register_emit_deregister() {
        let registry = CallbackRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = registry.register(move |event| {
            if let PipelineEvent::DeviceRecovered { version } = event {
                c.fetch_add(*version as usize, Ordering::SeqCst);
            }
        });
        assert_eq!(registry.len(), 1);

        registry.emit(&PipelineEvent::DeviceRecovered { version: 3 });
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(registry.deregister(id));
        assert!(!registry.deregister(id));
        registry.emit(&PipelineEvent::DeviceRecovered { version: 3 });
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callback_may_register_during_emit() {
        let registry = Arc::new(CallbackRegistry::new());
        let r = registry.clone();
        registry.register(move |_| {
            r.register(|_| {});
        });

        registry.emit(&PipelineEvent::DeviceRecovered { version: 1 });
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = CallbackRegistry::new();
        let a = registry.register(|_| {});
        let b = registry.register(|_| {});
        assert_ne!(a, b);
    }
}
