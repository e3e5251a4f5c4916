use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use lockmgr::{
    AsyncGrantNotification, BasicLocker, CondvarNotification, LockManager, LockMode, LockRequest,
    LockResult, RequestStatus, ResourceId, ResourceType,
};

const WAIT: Duration = Duration::from_secs(30);

/// Locks `resource`, blocking until granted.
fn acquire(mgr: &LockManager, resource: ResourceId, mode: LockMode) -> LockRequest {
    let notify = Arc::new(CondvarNotification::new());
    let request = LockRequest::new(Arc::new(BasicLocker::new()), notify.clone());
    if mgr.lock(resource, &request, mode) == LockResult::Waiting {
        assert_eq!(notify.wait(WAIT), Some(LockResult::Ok), "{mode} never granted");
    }
    assert_eq!(request.status(), RequestStatus::Granted);
    request
}

#[test]
fn exclusive_holders_never_overlap() {
    let mgr = Arc::new(LockManager::new());
    let resource = ResourceId::from_name(ResourceType::Collection, "test.exclusive");
    // Positive while readers hold the lock, -1 while a writer does.
    let occupancy = Arc::new(AtomicI64::new(0));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let mgr = Arc::clone(&mgr);
            let occupancy = Arc::clone(&occupancy);
            thread::spawn(move || {
                for i in 0..200 {
                    let writer = (t + i) % 3 == 0;
                    let mode = if writer {
                        LockMode::Exclusive
                    } else {
                        LockMode::Shared
                    };
                    let request = acquire(&mgr, resource, mode);
                    if writer {
                        let swapped =
                            occupancy.compare_exchange(0, -1, Ordering::SeqCst, Ordering::SeqCst);
                        assert_eq!(swapped, Ok(0), "writer admitted alongside other holders");
                        thread::yield_now();
                        occupancy.store(0, Ordering::SeqCst);
                    } else {
                        let before = occupancy.fetch_add(1, Ordering::SeqCst);
                        assert!(before >= 0, "reader admitted while a writer holds the lock");
                        thread::yield_now();
                        occupancy.fetch_sub(1, Ordering::SeqCst);
                    }
                    assert!(mgr.unlock(&request));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    mgr.cleanup_unused_locks();
    assert_eq!(mgr.num_lock_heads(), 0);
}

#[test]
fn intent_traffic_survives_concurrent_migration() {
    let mgr = Arc::new(LockManager::new());
    let resource = ResourceId::new(ResourceType::Global, 0);
    let strong_grants = Arc::new(AtomicU32::new(0));

    let mut handles: Vec<_> = (0..8)
        .map(|t| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                for i in 0..500 {
                    let mode = if (t + i) % 2 == 0 {
                        LockMode::IntentShared
                    } else {
                        LockMode::IntentExclusive
                    };
                    let request = acquire(&mgr, resource, mode);
                    assert!(mgr.unlock(&request));
                }
            })
        })
        .collect();

    {
        let mgr = Arc::clone(&mgr);
        let strong_grants = Arc::clone(&strong_grants);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let mode = if i % 2 == 0 {
                    LockMode::Shared
                } else {
                    LockMode::Exclusive
                };
                let request = acquire(&mgr, resource, mode);
                strong_grants.fetch_add(1, Ordering::SeqCst);
                assert!(mgr.unlock(&request));
                if i % 10 == 0 {
                    mgr.cleanup_unused_locks();
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(strong_grants.load(Ordering::SeqCst), 50);

    mgr.cleanup_unused_locks();
    assert_eq!(mgr.num_lock_heads(), 0);
}

#[test]
fn upgrades_complete_once_other_readers_leave() {
    let mgr = Arc::new(LockManager::new());
    let resource = ResourceId::from_name(ResourceType::Database, "test");
    let upgrader = acquire(&mgr, resource, LockMode::Shared);
    let reader = acquire(&mgr, resource, LockMode::Shared);

    let notify = Arc::new(CondvarNotification::new());
    let converting = LockRequest::new(Arc::new(BasicLocker::new()), notify.clone());
    assert_eq!(mgr.lock(resource, &converting, LockMode::Shared), LockResult::Ok);
    assert_eq!(
        mgr.convert(resource, &converting, LockMode::Exclusive),
        LockResult::Waiting
    );

    let releaser = {
        let mgr = Arc::clone(&mgr);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(mgr.unlock(&reader));
            assert!(mgr.unlock(&upgrader));
        })
    };

    assert_eq!(notify.wait(WAIT), Some(LockResult::Ok));
    assert_eq!(converting.mode(), LockMode::Exclusive);
    releaser.join().unwrap();

    assert!(!mgr.unlock(&converting));
    assert!(mgr.unlock(&converting));
}

#[test]
fn timed_out_waiter_cancels_by_unlocking() {
    let mgr = LockManager::new();
    let resource = ResourceId::from_name(ResourceType::Collection, "test.timeout");
    let holder = acquire(&mgr, resource, LockMode::Exclusive);

    let notify = Arc::new(CondvarNotification::new());
    let waiter = LockRequest::new(Arc::new(BasicLocker::new()), notify.clone());
    assert_eq!(mgr.lock(resource, &waiter, LockMode::Shared), LockResult::Waiting);
    assert_eq!(notify.wait(Duration::from_millis(10)), None);
    assert!(mgr.unlock(&waiter));

    assert!(mgr.unlock(&holder));
    assert_eq!(notify.wait(Duration::ZERO), None, "cancelled waiter was notified");

    mgr.cleanup_unused_locks();
    assert_eq!(mgr.num_lock_heads(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_waiters_are_granted_in_turn() {
    let mgr = Arc::new(LockManager::new());
    let resource = ResourceId::from_name(ResourceType::Collection, "test.async");
    let holder = acquire(&mgr, resource, LockMode::Exclusive);
    let finished = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let notify = Arc::new(AsyncGrantNotification::new());
            let request = LockRequest::new(Arc::new(BasicLocker::new()), notify.clone());
            assert_eq!(mgr.lock(resource, &request, LockMode::Exclusive), LockResult::Waiting);
            let mgr = Arc::clone(&mgr);
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                assert_eq!(notify.wait_timeout(WAIT).await, Some(LockResult::Ok));
                finished.fetch_add(1, Ordering::SeqCst);
                assert!(mgr.unlock(&request));
            })
        })
        .collect();

    assert!(mgr.unlock(&holder));
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(finished.load(Ordering::SeqCst), 4);
}
