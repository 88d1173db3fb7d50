//! Capture lifecycle policy
//!
//! Capture costs CPU and bus bandwidth, so the worker runs only while some
//! consumer actually needs the live feed. A reentrant lock counter suspends
//! that policy entirely: image transfers (and any other bulk operation that
//! contends for the worker's context) increment it, forcing capture off
//! until the matching resume. Start and stop are idempotent, so the policy
//! can be re-evaluated every rendered frame from any number of call sites.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::worker::CaptureWorker;

/// Demand-and-lock gate around one [`CaptureWorker`].
pub struct CaptureLifecycle {
    worker: Arc<Mutex<CaptureWorker>>,
    locks: AtomicI32,
    local_address: String,
}

impl CaptureLifecycle {
    pub fn new(worker: CaptureWorker, local_address: impl Into<String>) -> Self {
        Self {
            worker: Arc::new(Mutex::new(worker)),
            locks: AtomicI32::new(0),
            local_address: local_address.into(),
        }
    }

    /// Shared handle to the gated worker.
    pub fn worker(&self) -> Arc<Mutex<CaptureWorker>> {
        Arc::clone(&self.worker)
    }

    pub fn lock_count(&self) -> i32 {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_running()
    }

    /// Force capture off until the matching [`resume`](Self::resume).
    /// Reentrant: overlapping suspends stack.
    pub fn suspend(&self) {
        self.locks.fetch_add(1, Ordering::SeqCst);
        self.worker.lock().stop();
    }

    /// Release one suspend. Restart is left to the next [`update`](Self::update)
    /// so redundant resume/start pairs cannot race.
    pub fn resume(&self) {
        let prev = self.locks.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            log::warn!("capture resume without matching suspend");
            self.locks.store(0, Ordering::SeqCst);
        }
    }

    /// Run `f` with capture suspended.
    pub fn suspended<R>(&self, f: impl FnOnce() -> R) -> R {
        self.suspend();
        let result = f();
        self.resume();
        result
    }

    /// Re-evaluate the policy. Called once per rendered frame.
    ///
    /// The worker must be running iff no suspend is outstanding and some
    /// consumer demands the live feed. Non-host nodes no-op inside
    /// `CaptureWorker::start` but still track shared state consistently.
    pub fn update(&self, demand: bool) {
        let mut worker = self.worker.lock();
        let should_run = demand && self.locks.load(Ordering::SeqCst) == 0;

        if should_run {
            if !worker.is_running() {
                worker.start(&self.local_address);
            }
        } else if worker.is_running() {
            worker.stop();
        }
    }
}
