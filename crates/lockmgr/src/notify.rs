//! Grant notifications.
//!
//! A request that comes back [`LockResult::Waiting`] is granted later by
//! whichever thread releases the conflicting lock. That thread calls
//! [`LockGrantNotification::notify`] exactly once per waiting episode, *while
//! holding lock manager internal mutexes*. Implementations must therefore be
//! quick and must never call back into the lock manager.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::resource::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// The lock is held and may be used immediately.
    Ok,
    /// The request is queued; a notification will follow.
    Waiting,
}

pub trait LockGrantNotification: Send + Sync {
    fn notify(&self, resource: ResourceId, result: LockResult);
}

// ── CondvarNotification ──────────────────────────────────

/// Blocking waiter for thread-per-operation callers.
#[derive(Default)]
pub struct CondvarNotification {
    result: Mutex<Option<LockResult>>,
    cond: Condvar,
}

impl CondvarNotification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets a previous delivery so the notification can be reused.
    pub fn clear(&self) {
        *self.result.lock() = None;
    }

    /// Waits up to `timeout` for a delivery. `None` means the wait timed out;
    /// the caller then cancels by unlocking the request.
    pub fn wait(&self, timeout: Duration) -> Option<LockResult> {
        let deadline = Instant::now() + timeout;
        let mut result = self.result.lock();
        while result.is_none() {
            if self.cond.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        result.take()
    }
}

impl LockGrantNotification for CondvarNotification {
    fn notify(&self, _resource: ResourceId, result: LockResult) {
        let mut slot = self.result.lock();
        assert!(slot.is_none(), "grant notification delivered twice");
        *slot = Some(result);
        self.cond.notify_all();
    }
}

// ── AsyncGrantNotification ───────────────────────────────

/// Waiter for async callers. Delivery only stores the result and wakes the
/// waiting task, so any continuation runs on the caller's executor rather
/// than inside the lock manager.
#[derive(Default)]
pub struct AsyncGrantNotification {
    result: Mutex<Option<LockResult>>,
    wake: tokio::sync::Notify,
}

impl AsyncGrantNotification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        *self.result.lock() = None;
    }

    pub async fn wait(&self) -> LockResult {
        loop {
            let notified = self.wake.notified();
            if let Some(result) = self.result.lock().take() {
                return result;
            }
            notified.await;
        }
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Option<LockResult> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

impl LockGrantNotification for AsyncGrantNotification {
    fn notify(&self, _resource: ResourceId, result: LockResult) {
        let mut slot = self.result.lock();
        assert!(slot.is_none(), "grant notification delivered twice");
        *slot = Some(result);
        drop(slot);
        self.wake.notify_one();
    }
}

// ── RecordingNotification ────────────────────────────────

/// Records every delivery without blocking anybody. Used by tests and by
/// callers that poll.
#[derive(Default)]
pub struct RecordingNotification {
    count: AtomicU32,
    last: Mutex<Option<(ResourceId, LockResult)>>,
}

impl RecordingNotification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_notifies(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn last_resource(&self) -> Option<ResourceId> {
        self.last.lock().map(|(resource, _)| resource)
    }

    pub fn last_result(&self) -> Option<LockResult> {
        self.last.lock().map(|(_, result)| result)
    }
}

impl LockGrantNotification for RecordingNotification {
    fn notify(&self, resource: ResourceId, result: LockResult) {
        *self.last.lock() = Some((resource, result));
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
