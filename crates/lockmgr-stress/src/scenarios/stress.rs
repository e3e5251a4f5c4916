use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use lockmgr::{
    BasicLocker, CondvarNotification, LockManager, LockMode, LockRequest, LockResult, ResourceId,
    ResourceType,
};

use crate::AnyResult;

const COLLECTIONS: u64 = 4;

pub struct Options {
    pub threads: usize,
    pub iterations: usize,
    pub timeout_ms: u64,
}

#[derive(Default)]
struct Counters {
    granted: AtomicU64,
    waited: AtomicU64,
    timed_out: AtomicU64,
    upgrades: AtomicU64,
}

pub fn run(mgr: &Arc<LockManager>, options: Options) -> AnyResult<()> {
    let options = Arc::new(options);
    let counters = Arc::new(Counters::default());
    let started = Instant::now();

    let mut handles = Vec::with_capacity(options.threads);
    for id in 0..options.threads {
        let mgr = Arc::clone(mgr);
        let options = Arc::clone(&options);
        let counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name(format!("stress-{id}"))
            .spawn(move || worker(&mgr, id, &options, &counters))
            .map_err(|e| format!("failed to spawn stress thread {id}: {e}"))?;
        handles.push(handle);
    }
    for handle in handles {
        handle
            .join()
            .map_err(|_| "stress thread panicked".to_string())?;
    }

    println!(
        "stress: {} threads x {} iterations in {:?}: {} granted, {} waited, {} timed out, {} upgrades",
        options.threads,
        options.iterations,
        started.elapsed(),
        counters.granted.load(Ordering::Relaxed),
        counters.waited.load(Ordering::Relaxed),
        counters.timed_out.load(Ordering::Relaxed),
        counters.upgrades.load(Ordering::Relaxed),
    );
    Ok(())
}

fn worker(mgr: &LockManager, id: usize, options: &Options, counters: &Counters) {
    let global = ResourceId::new(ResourceType::Global, 0);
    let locker = Arc::new(BasicLocker::new().with_debug_info(format!("stress worker {id}")));
    let timeout = Duration::from_millis(options.timeout_ms);
    let mut rng = XorShift(id as u64 * 0x9e37_79b9 + 1);

    for _ in 0..options.iterations {
        let collection = ResourceId::new(ResourceType::Collection, rng.next_u64() % COLLECTIONS);
        let (global_mode, collection_mode, upgrade) = match rng.next_u64() % 100 {
            0..=59 => (LockMode::IntentShared, Some(LockMode::Shared), false),
            60..=84 => (LockMode::IntentExclusive, Some(LockMode::Exclusive), false),
            85..=94 => (LockMode::IntentExclusive, Some(LockMode::Shared), true),
            _ => (LockMode::Exclusive, None, false),
        };

        let acquire = |resource, mode| Held::acquire(mgr, &locker, resource, mode, timeout, counters);
        let Some(global_lock) = acquire(global, global_mode) else {
            continue;
        };
        if let Some(mode) = collection_mode {
            if let Some(collection_lock) = acquire(collection, mode) {
                if upgrade {
                    collection_lock.upgrade(mgr, collection, LockMode::Exclusive, timeout, counters);
                }
                collection_lock.release(mgr);
            }
        }
        global_lock.release(mgr);
    }
}

struct Held {
    request: LockRequest,
    notify: Arc<CondvarNotification>,
}

impl Held {
    fn acquire(
        mgr: &LockManager,
        locker: &Arc<BasicLocker>,
        resource: ResourceId,
        mode: LockMode,
        timeout: Duration,
        counters: &Counters,
    ) -> Option<Held> {
        let notify = Arc::new(CondvarNotification::new());
        let request = LockRequest::new(locker.clone(), notify.clone());
        if mgr.lock(resource, &request, mode) == LockResult::Waiting {
            counters.waited.fetch_add(1, Ordering::Relaxed);
            if notify.wait(timeout).is_none() {
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
                mgr.unlock(&request);
                return None;
            }
        }
        counters.granted.fetch_add(1, Ordering::Relaxed);
        Some(Held { request, notify })
    }

    /// A timed-out upgrade is cancelled and the original mode kept.
    fn upgrade(
        &self,
        mgr: &LockManager,
        resource: ResourceId,
        mode: LockMode,
        timeout: Duration,
        counters: &Counters,
    ) {
        counters.upgrades.fetch_add(1, Ordering::Relaxed);
        if mgr.convert(resource, &self.request, mode) == LockResult::Waiting {
            counters.waited.fetch_add(1, Ordering::Relaxed);
            if self.notify.wait(timeout).is_none() {
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
                mgr.unlock(&self.request);
            }
        }
    }

    fn release(self, mgr: &LockManager) {
        while !mgr.unlock(&self.request) {}
    }
}

struct XorShift(u64);

impl XorShift {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}
