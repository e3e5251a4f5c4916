//! Hierarchical multi-granularity lock manager.
//!
//! Callers lock [`ResourceId`]s in one of five [`LockMode`]s through a
//! caller-owned [`LockRequest`]. A request is either granted immediately
//! ([`LockResult::Ok`]) or queued ([`LockResult::Waiting`]), in which case the
//! request's [`LockGrantNotification`] fires once it is granted. Unlocking a
//! queued request cancels it; timeouts are up to the caller.
//!
//! ## Fast path
//!
//! While every request on a resource uses an intent mode (IS or IX), grants
//! are recorded in the requester's partition and never touch the resource's
//! bucket. The first S or X request migrates them all back.
//!
//! ## Fairness
//!
//! Waiters are granted in FIFO order, except that requests flagged with
//! [`LockRequest::set_enqueue_at_front`] queue at the front, and that while a
//! [`LockRequest::set_compatible_first`] holder is granted, compatible
//! requests may overtake conflicting ones.
//!
//! When the `diagnostics` feature is **enabled**, bucket and partition mutexes
//! also record contention, reported by [`LockManager::contention_snapshot`].

mod config;
mod head;
mod list;
mod locker;
mod manager;
mod mode;
mod notify;
mod partition;
mod request;
mod resource;
mod snapshot;
mod sync;

pub use config::{DEFAULT_NUM_BUCKETS, DEFAULT_NUM_PARTITIONS, LockManagerConfig};
pub use locker::{BasicLocker, Locker, LockerId};
pub use manager::LockManager;
pub use mode::{
    INTENT_MODES, LOCK_MODES_COUNT, LockMode, conflicts, is_mode_covered, mode_mask,
};
pub use notify::{
    AsyncGrantNotification, CondvarNotification, LockGrantNotification, LockResult,
    RecordingNotification,
};
pub use request::{LockRequest, RequestStatus};
pub use resource::{RESOURCE_TYPE_BITS, ResourceId, ResourceType};
pub use snapshot::{
    ClientRegistry, ContentionSnapshot, LockManagerSnapshot, MutexContention, RequestSnapshot,
    ResourceSnapshot,
};
pub use sync::MutexStats;
