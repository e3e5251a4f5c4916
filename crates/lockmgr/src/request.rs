//! Lock requests: one per (locker, resource) binding.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::list::Slot;
use crate::locker::{Locker, LockerId};
use crate::mode::LockMode;
use crate::notify::{LockGrantNotification, LockResult};
use crate::resource::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    New,
    Granted,
    Waiting,
    Converting,
}

impl RequestStatus {
    pub fn name(self) -> &'static str {
        match self {
            RequestStatus::New => "new",
            RequestStatus::Granted => "granted",
            RequestStatus::Waiting => "waiting",
            RequestStatus::Converting => "converting",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which structure currently links the request, and where.
///
/// A granted or converting request owned by a head sits on its granted list,
/// a waiting one on its conflict list. Partitioned heads only hold granted
/// requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    Unowned,
    Head { resource: ResourceId, slot: Slot },
    Partition { resource: ResourceId, slot: Slot },
}

/// Mutated only by the thread holding the mutex of the owning head (or by
/// the request's own thread while it is unowned).
#[derive(Debug)]
pub(crate) struct RequestState {
    pub(crate) status: RequestStatus,
    pub(crate) mode: LockMode,
    pub(crate) convert_mode: LockMode,
    pub(crate) enqueue_at_front: bool,
    pub(crate) compatible_first: bool,
    /// Sticky: set when the request was admitted as a fast-path candidate.
    pub(crate) partitioned: bool,
    pub(crate) owner: Owner,
}

impl RequestState {
    fn fresh() -> Self {
        Self {
            status: RequestStatus::New,
            mode: LockMode::None,
            convert_mode: LockMode::None,
            enqueue_at_front: false,
            compatible_first: false,
            partitioned: false,
            owner: Owner::Unowned,
        }
    }
}

pub(crate) struct RequestInner {
    locker: Arc<dyn Locker>,
    notify: Arc<dyn LockGrantNotification>,
    // Only ever touched by the locker's own thread of control.
    recursive_count: AtomicU32,
    state: Mutex<RequestState>,
}

pub(crate) type RequestRef = Arc<RequestInner>;

impl RequestInner {
    pub(crate) fn locker(&self) -> &dyn Locker {
        &*self.locker
    }

    pub(crate) fn locker_id(&self) -> LockerId {
        self.locker.id()
    }

    /// The state mutex is a leaf: never acquire a bucket or partition mutex,
    /// and never deliver a notification, while holding it.
    pub(crate) fn state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock()
    }

    pub(crate) fn notify(&self, resource: ResourceId, result: LockResult) {
        self.notify.notify(resource, result);
    }

    pub(crate) fn recursive_count(&self) -> u32 {
        self.recursive_count.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_recursive_count(&self) -> u32 {
        self.recursive_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the remaining count.
    pub(crate) fn decrement_recursive_count(&self) -> u32 {
        let previous = self.recursive_count.fetch_sub(1, Ordering::Relaxed);
        assert!(previous > 0, "unlock of a request that is not held");
        previous - 1
    }
}

/// Caller-owned lock request.
///
/// Create one per resource an operation locks, pass it to
/// [`LockManager::lock`](crate::LockManager::lock), and keep it until
/// [`LockManager::unlock`](crate::LockManager::unlock) returns `true`. To lock
/// again afterwards, call [`reset`](Self::reset) first.
///
/// Dropping a request that is still linked does not unlink it. A dropped
/// waiter stays queued, is granted in turn, and then holds the resource for
/// the rest of the manager's life because nobody can unlock it. Cancel with
/// `unlock` before dropping.
pub struct LockRequest {
    pub(crate) inner: RequestRef,
}

impl LockRequest {
    pub fn new(locker: Arc<dyn Locker>, notify: Arc<dyn LockGrantNotification>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                locker,
                notify,
                recursive_count: AtomicU32::new(1),
                state: Mutex::new(RequestState::fresh()),
            }),
        }
    }

    /// Queue ahead of every other waiter on conflict. Used for strong global
    /// requests that must not wait behind ordinary traffic.
    pub fn set_enqueue_at_front(&self, enqueue_at_front: bool) {
        let mut state = self.inner.state();
        assert_eq!(state.status, RequestStatus::New, "flags are fixed once locked");
        state.enqueue_at_front = enqueue_at_front;
    }

    /// While this request is granted, its resource prefers granting compatible
    /// requests over strict arrival order.
    pub fn set_compatible_first(&self, compatible_first: bool) {
        let mut state = self.inner.state();
        assert_eq!(state.status, RequestStatus::New, "flags are fixed once locked");
        state.compatible_first = compatible_first;
    }

    /// Returns the request to its freshly constructed state.
    pub fn reset(&self) {
        let mut state = self.inner.state();
        assert!(
            state.status == RequestStatus::New || self.inner.recursive_count() == 0,
            "reset of a request that is still held"
        );
        assert_eq!(state.owner, Owner::Unowned, "reset of a linked request");
        *state = RequestState::fresh();
        self.inner.recursive_count.store(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> RequestStatus {
        self.inner.state().status
    }

    pub fn mode(&self) -> LockMode {
        self.inner.state().mode
    }

    pub fn convert_mode(&self) -> LockMode {
        self.inner.state().convert_mode
    }

    pub fn recursive_count(&self) -> u32 {
        self.inner.recursive_count()
    }

    pub fn enqueue_at_front(&self) -> bool {
        self.inner.state().enqueue_at_front
    }

    pub fn compatible_first(&self) -> bool {
        self.inner.state().compatible_first
    }

    /// Whether the request was admitted as a fast-path candidate. Stays set
    /// after the request migrates to the full lock head.
    pub fn is_partitioned(&self) -> bool {
        self.inner.state().partitioned
    }

    pub fn locker_id(&self) -> LockerId {
        self.inner.locker_id()
    }
}

impl Drop for LockRequest {
    fn drop(&mut self) {
        let state = self.inner.state();
        if state.owner != Owner::Unowned {
            tracing::warn!(
                locker = %self.inner.locker_id(),
                mode = %state.mode,
                status = %state.status,
                "lock request dropped while still linked in the lock manager"
            );
        }
    }
}

impl std::fmt::Debug for LockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("LockRequest")
            .field("locker", &self.inner.locker_id())
            .field("status", &state.status)
            .field("mode", &state.mode)
            .field("convert_mode", &state.convert_mode)
            .field("recursive_count", &self.inner.recursive_count())
            .field("partitioned", &state.partitioned)
            .finish()
    }
}
