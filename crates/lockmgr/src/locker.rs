//! The caller-side identity on whose behalf lock requests are made.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOCKER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockerId(pub u64);

impl LockerId {
    /// Allocates an id that is unique within this process.
    pub fn next() -> Self {
        Self(NEXT_LOCKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for LockerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One per logical operation. Every request a locker makes is routed to the
/// partition selected by its id, so ids should be well distributed.
pub trait Locker: Send + Sync {
    fn id(&self) -> LockerId;

    /// Free-form descriptor included in diagnostics dumps.
    fn debug_info(&self) -> String {
        String::new()
    }

    /// Identity of the thread driving this locker, if known.
    fn thread_name(&self) -> Option<String> {
        None
    }
}

#[derive(Debug)]
pub struct BasicLocker {
    id: LockerId,
    debug_info: String,
    thread_name: String,
}

impl BasicLocker {
    /// Creates a locker bound to the calling thread.
    pub fn new() -> Self {
        let thread = std::thread::current();
        let thread_name = match thread.name() {
            Some(name) => format!("{name} ({:?})", thread.id()),
            None => format!("{:?}", thread.id()),
        };
        Self {
            id: LockerId::next(),
            debug_info: String::new(),
            thread_name,
        }
    }

    pub fn with_debug_info(mut self, debug_info: impl Into<String>) -> Self {
        self.debug_info = debug_info.into();
        self
    }
}

impl Default for BasicLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl Locker for BasicLocker {
    fn id(&self) -> LockerId {
        self.id
    }

    fn debug_info(&self) -> String {
        self.debug_info.clone()
    }

    fn thread_name(&self) -> Option<String> {
        Some(self.thread_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = BasicLocker::new();
        let b = BasicLocker::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn debug_info_is_reported() {
        let locker = BasicLocker::new().with_debug_info("conn42");
        assert_eq!(locker.debug_info(), "conn42");
        assert!(locker.thread_name().is_some());
    }
}
