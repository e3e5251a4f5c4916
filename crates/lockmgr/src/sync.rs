//! The mutex guarding each bucket and partition.
//!
//! With the `diagnostics` feature **disabled** this is a plain
//! `parking_lot::Mutex`. When **enabled**, every acquisition first tries the
//! lock without blocking and records whether it had to wait and for how long,
//! which is what [`LockManager::contention_snapshot`] reports.
//!
//! [`LockManager::contention_snapshot`]: crate::LockManager::contention_snapshot

/// Counters for one mutex. All zero when diagnostics are disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutexStats {
    pub acquires: u64,
    pub contended: u64,
    pub wait_nanos: u64,
}

#[cfg(feature = "diagnostics")]
mod inner {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    use super::MutexStats;

    pub(crate) struct StatMutex<T> {
        inner: parking_lot::Mutex<T>,
        acquires: AtomicU64,
        contended: AtomicU64,
        wait_nanos: AtomicU64,
    }

    impl<T> StatMutex<T> {
        pub(crate) fn new(value: T) -> Self {
            Self {
                inner: parking_lot::Mutex::new(value),
                acquires: AtomicU64::new(0),
                contended: AtomicU64::new(0),
                wait_nanos: AtomicU64::new(0),
            }
        }

        pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, T> {
            self.acquires.fetch_add(1, Ordering::Relaxed);
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            let since = Instant::now();
            let guard = self.inner.lock();
            self.contended.fetch_add(1, Ordering::Relaxed);
            self.wait_nanos
                .fetch_add(since.elapsed().as_nanos() as u64, Ordering::Relaxed);
            guard
        }

        pub(crate) fn stats(&self) -> MutexStats {
            MutexStats {
                acquires: self.acquires.load(Ordering::Relaxed),
                contended: self.contended.load(Ordering::Relaxed),
                wait_nanos: self.wait_nanos.load(Ordering::Relaxed),
            }
        }
    }
}

#[cfg(not(feature = "diagnostics"))]
mod inner {
    use super::MutexStats;

    pub(crate) struct StatMutex<T>(parking_lot::Mutex<T>);

    impl<T> StatMutex<T> {
        #[inline]
        pub(crate) fn new(value: T) -> Self {
            Self(parking_lot::Mutex::new(value))
        }

        #[inline]
        pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, T> {
            self.0.lock()
        }

        #[inline]
        pub(crate) fn stats(&self) -> MutexStats {
            MutexStats::default()
        }
    }
}

pub(crate) use inner::StatMutex;
