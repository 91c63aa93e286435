//! Request scheduling.
//!
//! Callers submit requests without blocking. Work is keyed by logical
//! identity (region + kind) in a pending table:
//!
//! - a queued, not yet started task is overwritten by newer submissions for
//!   the same identity; handles waiting on a different request resolve as
//!   [`TaskStatus::Superseded`]
//! - an executing task is marked dirty instead, and the latest request is
//!   queued again as soon as it finishes
//!
//! Identities travel to workers over a FIFO channel, one message per queued
//! entry, so at most one computation per identity is ever in flight.

use crate::calculus::{MeasurementEngine, Spacing};
use crate::callback::{CallbackRegistry, HandleId, PipelineEvent};
use crate::context::{AnalysisContext, Limits};
use crate::error::AnalysisError;
use crate::field::ScalarField;
use crate::request::{AnalysisOutput, AnalysisRequest, AnalysisResult, CacheKey, RequestIdentity};
use crossbeam_channel::{unbounded, Receiver, Sender};
use shared::camera_interface::Timestamp;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Outcome of a submitted request as seen through its handle
#[derive(Debug, Clone)]
pub enum TaskStatus {
    Pending,
    /// Finished; the result may itself be a failure marker
    Completed(Arc<AnalysisResult>),
    /// Replaced by a different request for the same identity before it ran
    Superseded,
    /// Scheduler shut down before the request ran
    Cancelled,
}

impl TaskStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    pub fn result(&self) -> Option<&Arc<AnalysisResult>> {
        match self {
            TaskStatus::Completed(result) => Some(result),
            _ => None,
        }
    }
}

type ResultCallback = Box<dyn FnOnce(&TaskStatus) + Send>;

struct SlotState {
    status: TaskStatus,
    callbacks: Vec<ResultCallback>,
}

/// Write-once cell behind a [`TaskHandle`]
struct ResultSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ResultSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                status: TaskStatus::Pending,
                callbacks: Vec::new(),
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve once; later calls are ignored. Callbacks run outside the lock.
    fn resolve(&self, status: TaskStatus) -> bool {
        let callbacks = {
            let mut state = self.lock();
            if !state.status.is_pending() {
                return false;
            }
            state.status = status.clone();
            std::mem::take(&mut state.callbacks)
        };
        self.ready.notify_all();
        for callback in callbacks {
            callback(&status);
        }
        true
    }

    fn status(&self) -> TaskStatus {
        self.lock().status.clone()
    }

    fn wait_timeout(&self, timeout: Duration) -> TaskStatus {
        let guard = self.lock();
        let (guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |s| s.status.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        guard.status.clone()
    }

    fn on_result(&self, callback: ResultCallback) {
        let mut state = self.lock();
        if state.status.is_pending() {
            state.callbacks.push(callback);
            return;
        }
        let status = state.status.clone();
        drop(state);
        callback(&status);
    }
}

/// Caller's view of a submitted request
#[derive(Clone)]
pub struct TaskHandle {
    id: HandleId,
    identity: RequestIdentity,
    slot: Arc<ResultSlot>,
}

impl TaskHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn identity(&self) -> RequestIdentity {
        self.identity
    }

    /// Non-blocking status check
    pub fn poll(&self) -> TaskStatus {
        self.slot.status()
    }

    /// Block up to `timeout` for a resolution
    pub fn wait_timeout(&self, timeout: Duration) -> TaskStatus {
        self.slot.wait_timeout(timeout)
    }

    /// Run `callback` once the handle resolves, immediately if it already has.
    ///
    /// The callback runs on the resolving thread.
    pub fn on_result<F>(&self, callback: F)
    where
        F: FnOnce(&TaskStatus) + Send + 'static,
    {
        self.slot.on_result(Box::new(callback));
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .finish()
    }
}

struct Waiter {
    id: HandleId,
    slot: Arc<ResultSlot>,
}

/// Latest request for an identity plus everyone waiting on it.
///
/// All waiters of one batch asked for an equal request.
struct Batch {
    request: AnalysisRequest,
    waiters: Vec<Waiter>,
}

enum TaskEntry {
    /// In the channel, not yet picked up
    Queued(Batch),
    Running {
        batch: Batch,
        field_version: u64,
        /// Set when a newer request arrived mid-run
        rerun: Option<Batch>,
    },
}

enum Message {
    Run(RequestIdentity),
    Stop,
}

#[derive(Debug, Default)]
struct StatCounters {
    submitted: AtomicU64,
    cache_hits: AtomicU64,
    executions: AtomicU64,
    superseded: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub cache_hits: u64,
    /// Measurement engine invocations
    pub executions: u64,
    pub superseded: u64,
    /// Submissions that joined an existing queued or running task
    pub coalesced: u64,
    /// Executions that produced a failure marker
    pub failures: u64,
}

struct Shared {
    context: Arc<AnalysisContext>,
    engine: Arc<dyn MeasurementEngine>,
    callbacks: Arc<CallbackRegistry>,
    table: Mutex<HashMap<RequestIdentity, TaskEntry>>,
    sender: Sender<Message>,
    next_handle: AtomicU64,
    shutting_down: AtomicBool,
    stats: StatCounters,
}

/// Dispatches analysis requests to a pool of worker threads
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl Scheduler {
    /// Start `worker_threads` workers (at least one)
    pub fn new(
        context: Arc<AnalysisContext>,
        engine: Arc<dyn MeasurementEngine>,
        worker_threads: usize,
        callbacks: Arc<CallbackRegistry>,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            context,
            engine,
            callbacks,
            table: Mutex::new(HashMap::new()),
            sender,
            next_handle: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            stats: StatCounters::default(),
        });

        let worker_count = worker_threads.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = shared.clone();
            let receiver = receiver.clone();
            let worker = std::thread::Builder::new()
                .name(format!("analysis-worker-{index}"))
                .spawn(move || worker_loop(worker_shared, receiver, index));
            match worker {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    tracing::error!("Failed to spawn analysis worker {index}: {e}");
                    shared.shutting_down.store(true, Ordering::SeqCst);
                    for _ in 0..workers.len() {
                        let _ = shared.sender.send(Message::Stop);
                    }
                    for started in workers {
                        let _ = started.join();
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!("Scheduler started with {worker_count} worker(s)");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        })
    }

    /// Submit a request without blocking.
    ///
    /// The request is validated against the current field before anything is
    /// queued; validation failures are returned synchronously. The request is
    /// stamped with the current field version, which is what it will be
    /// computed against (or newer).
    pub fn submit(&self, request: AnalysisRequest) -> Result<TaskHandle, AnalysisError> {
        self.shared.submit(request)
    }

    pub fn poll(&self, handle: &TaskHandle) -> TaskStatus {
        handle.poll()
    }

    pub fn on_result<F>(&self, handle: &TaskHandle, callback: F)
    where
        F: FnOnce(&TaskStatus) + Send + 'static,
    {
        handle.on_result(callback);
    }

    /// Identities with queued or running work
    pub fn pending_count(&self) -> usize {
        self.shared.lock_table().len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let s = &self.shared.stats;
        SchedulerStats {
            submitted: s.submitted.load(Ordering::SeqCst),
            cache_hits: s.cache_hits.load(Ordering::SeqCst),
            executions: s.executions.load(Ordering::SeqCst),
            superseded: s.superseded.load(Ordering::SeqCst),
            coalesced: s.coalesced.load(Ordering::SeqCst),
            failures: s.failures.load(Ordering::SeqCst),
        }
    }

    /// Finish queued work, stop the workers and cancel anything left over.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for _ in 0..self.worker_count {
            let _ = self.shared.sender.send(Message::Stop);
        }
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Analysis worker panicked during shutdown");
            }
        }

        let leftovers: Vec<TaskEntry> = self
            .shared
            .lock_table()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let mut cancelled = 0;
        for entry in leftovers {
            let batches = match entry {
                TaskEntry::Queued(batch) => vec![batch],
                TaskEntry::Running { batch, rerun, .. } => {
                    std::iter::once(batch).chain(rerun).collect()
                }
            };
            for waiter in batches.into_iter().flat_map(|b| b.waiters) {
                waiter.slot.resolve(TaskStatus::Cancelled);
                cancelled += 1;
            }
        }
        tracing::info!("Scheduler stopped, {cancelled} request(s) cancelled");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, receiver: Receiver<Message>, index: usize) {
    tracing::debug!("Analysis worker {index} started");
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(identity) => shared.run(identity),
            Message::Stop => break,
        }
    }
    tracing::debug!("Analysis worker {index} stopped");
}

fn validate(
    request: &AnalysisRequest,
    field: &ScalarField,
    limits: Limits,
) -> Result<(), AnalysisError> {
    let region = &request.region;
    if region.is_empty() {
        return Err(AnalysisError::InsufficientData(format!(
            "region {region} is empty"
        )));
    }
    if !field.contains(region) {
        return Err(AnalysisError::RegionOutOfBounds {
            region: *region,
            width: field.width(),
            height: field.height(),
        });
    }

    let kind = request.params.kind;
    let (min_w, min_h) = kind.min_extent();
    if region.width < min_w || region.height < min_h {
        return Err(AnalysisError::InsufficientData(format!(
            "{} needs at least {min_w}x{min_h} samples, region is {}x{}",
            kind.name(),
            region.width,
            region.height
        )));
    }

    if let Some(limit) = limits.max_region_pixels {
        if region.pixel_count() > limit {
            return Err(AnalysisError::RegionTooLarge {
                pixels: region.pixel_count(),
                limit,
            });
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "measurement panicked".to_string()
    }
}

impl Shared {
    fn lock_table(&self) -> MutexGuard<'_, HashMap<RequestIdentity, TaskEntry>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, mut request: AnalysisRequest) -> Result<TaskHandle, AnalysisError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AnalysisError::ShutDown);
        }
        request.params.validate()?;
        let field = self
            .context
            .fields()
            .snapshot()
            .ok_or(AnalysisError::NoField)?;
        validate(&request, &field, self.context.limits())?;
        request.field_version = field.version();

        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        let identity = request.identity();
        let waiter = Waiter {
            id: self.next_handle.fetch_add(1, Ordering::SeqCst),
            slot: Arc::new(ResultSlot::new()),
        };
        let handle = TaskHandle {
            id: waiter.id,
            identity,
            slot: waiter.slot.clone(),
        };

        let key = CacheKey::new(&request, field.version(), self.context.cache().epoch());
        if let Some(result) = self.context.cache().get(&key) {
            self.stats.cache_hits.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(
                "Cache hit for {} on {}",
                identity.kind.name(),
                identity.region
            );
            self.deliver(&waiter, result);
            return Ok(handle);
        }

        let mut superseded = Vec::new();
        {
            let mut table = self.lock_table();
            match table.entry(identity) {
                Entry::Vacant(slot) => {
                    slot.insert(TaskEntry::Queued(Batch {
                        request,
                        waiters: vec![waiter],
                    }));
                    if self.sender.send(Message::Run(identity)).is_err() {
                        tracing::warn!(
                            "Analysis queue closed; request for {} dropped",
                            identity.region
                        );
                    }
                }
                Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    TaskEntry::Queued(batch) => {
                        self.replace(batch, request, waiter, &mut superseded);
                    }
                    TaskEntry::Running {
                        batch,
                        field_version,
                        rerun,
                    } => {
                        if batch.request == request && request.field_version <= *field_version {
                            self.stats.coalesced.fetch_add(1, Ordering::SeqCst);
                            batch.waiters.push(waiter);
                        } else {
                            match rerun {
                                Some(next) => self.replace(next, request, waiter, &mut superseded),
                                None => {
                                    *rerun = Some(Batch {
                                        request,
                                        waiters: vec![waiter],
                                    });
                                }
                            }
                        }
                    }
                },
            }
        }

        for waiter in superseded {
            self.stats.superseded.fetch_add(1, Ordering::SeqCst);
            if waiter.slot.resolve(TaskStatus::Superseded) {
                self.callbacks.emit(&PipelineEvent::Superseded {
                    handle_id: waiter.id,
                    identity,
                });
            }
        }
        Ok(handle)
    }

    /// Last-write-wins update of a not-yet-started batch
    fn replace(
        &self,
        batch: &mut Batch,
        request: AnalysisRequest,
        waiter: Waiter,
        superseded: &mut Vec<Waiter>,
    ) {
        if batch.request == request {
            self.stats.coalesced.fetch_add(1, Ordering::SeqCst);
        } else {
            tracing::debug!(
                "Superseding queued {} request for {}",
                request.params.kind.name(),
                request.region
            );
            superseded.append(&mut batch.waiters);
        }
        batch.request = request;
        batch.waiters.push(waiter);
    }

    fn deliver(&self, waiter: &Waiter, result: Arc<AnalysisResult>) {
        if waiter.slot.resolve(TaskStatus::Completed(result.clone())) {
            self.callbacks.emit(&PipelineEvent::ResultReady {
                handle_id: waiter.id,
                result,
            });
        }
    }

    fn run(&self, identity: RequestIdentity) {
        let claimed = {
            let mut table = self.lock_table();
            match table.remove(&identity) {
                Some(TaskEntry::Queued(batch)) => match self.context.fields().snapshot() {
                    Some(field) => {
                        let request = batch.request.clone();
                        table.insert(
                            identity,
                            TaskEntry::Running {
                                batch,
                                field_version: field.version(),
                                rerun: None,
                            },
                        );
                        Some((request, field))
                    }
                    None => {
                        table.insert(identity, TaskEntry::Queued(batch));
                        None
                    }
                },
                Some(running) => {
                    tracing::warn!("Duplicate dispatch for {} ignored", identity.region);
                    table.insert(identity, running);
                    None
                }
                None => None,
            }
        };
        let Some((request, field)) = claimed else {
            return;
        };

        let result = Arc::new(self.execute(&request, &field));
        self.stats.executions.fetch_add(1, Ordering::SeqCst);
        if result.output.is_failure() {
            self.stats.failures.fetch_add(1, Ordering::SeqCst);
        }
        self.context.cache().put(
            CacheKey::new(&request, result.field_version, result.epoch),
            result.clone(),
        );

        let (waiters, requeue) = {
            let mut table = self.lock_table();
            match table.remove(&identity) {
                Some(TaskEntry::Running { batch, rerun, .. }) => {
                    let requeue = match rerun {
                        Some(next) => {
                            table.insert(identity, TaskEntry::Queued(next));
                            true
                        }
                        None => false,
                    };
                    (batch.waiters, requeue)
                }
                Some(other) => {
                    table.insert(identity, other);
                    (Vec::new(), false)
                }
                None => (Vec::new(), false),
            }
        };

        // Resolve before re-queueing so results for one identity arrive in start order
        for waiter in &waiters {
            self.deliver(waiter, result.clone());
        }
        if requeue && self.sender.send(Message::Run(identity)).is_err() {
            tracing::warn!(
                "Analysis queue closed; rerun for {} dropped",
                identity.region
            );
        }
    }

    fn execute(&self, request: &AnalysisRequest, field: &ScalarField) -> AnalysisResult {
        let started = Instant::now();
        let (snapshot, epoch) = self.context.calibration();
        let scale = request
            .params
            .scale_override
            .unwrap_or(snapshot.scale.pixels_per_unit);
        let unit = request
            .params
            .unit
            .clone()
            .unwrap_or_else(|| snapshot.scale.unit.clone());
        let max_samples = self.context.limits().max_warp_samples;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let patch = snapshot.warp_region(field, &request.region, max_samples)?;
            self.engine
                .measure(patch.samples.view(), &request.params, Spacing::from_scale(scale))
        }));

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(
                    "{} on {} failed: {e}",
                    request.params.kind.name(),
                    request.region
                );
                AnalysisOutput::Failed(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    "{} on {} panicked: {message}",
                    request.params.kind.name(),
                    request.region
                );
                AnalysisOutput::Failed(AnalysisError::Computation(message))
            }
        };

        AnalysisResult {
            request: request.clone(),
            output,
            field_version: field.version(),
            epoch,
            scale,
            unit,
            mode: snapshot.mode(),
            computed_at: Timestamp::now(),
            compute_time: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_slot_resolves_once() {
        let slot = ResultSlot::new();
        assert!(slot.status().is_pending());
        assert!(slot.resolve(TaskStatus::Superseded));
        assert!(!slot.resolve(TaskStatus::Cancelled));
        assert!(matches!(slot.status(), TaskStatus::Superseded));
    }

    #[test]
    fn test_slot_callbacks_before_and_after_resolution() {
        let slot = ResultSlot::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        slot.on_result(Box::new(move |status| {
            assert!(matches!(status, TaskStatus::Cancelled));
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        slot.resolve(TaskStatus::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c = calls.clone();
        slot.on_result(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_timeout_wakes_on_resolution() {
        let slot = Arc::new(ResultSlot::new());
        let s = slot.clone();
        let resolver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            s.resolve(TaskStatus::Superseded);
        });

        let status = slot.wait_timeout(Duration::from_secs(5));
        assert!(matches!(status, TaskStatus::Superseded));
        resolver.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires_while_pending() {
        let slot = ResultSlot::new();
        assert!(slot.wait_timeout(Duration::from_millis(10)).is_pending());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "measurement panicked");
    }
}
