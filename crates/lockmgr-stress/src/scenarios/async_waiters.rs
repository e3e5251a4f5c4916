use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lockmgr::{
    AsyncGrantNotification, BasicLocker, LockManager, LockMode, LockRequest, LockResult,
    ResourceId, ResourceType,
};

use crate::AnyResult;

const GRANT_TIMEOUT: Duration = Duration::from_secs(10);
const HOLD: Duration = Duration::from_millis(5);

/// Queues `tasks` exclusive waiters behind a holder and checks that they are
/// granted in the order they queued.
pub async fn run(mgr: &Arc<LockManager>, tasks: usize) -> AnyResult<()> {
    let resource = ResourceId::from_name(ResourceType::Collection, "stress.async_waiters");
    let holder = LockRequest::new(
        Arc::new(BasicLocker::new().with_debug_info("async holder")),
        Arc::new(AsyncGrantNotification::new()),
    );
    if mgr.lock(resource, &holder, LockMode::Exclusive) != LockResult::Ok {
        return Err(format!("{resource} was not free"));
    }

    let next_turn = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(tasks);
    for id in 0..tasks {
        let notify = Arc::new(AsyncGrantNotification::new());
        let locker = Arc::new(BasicLocker::new().with_debug_info(format!("async waiter {id}")));
        let request = LockRequest::new(locker, notify.clone());
        if mgr.lock(resource, &request, LockMode::Exclusive) != LockResult::Waiting {
            return Err(format!("waiter {id} was granted while the holder had the lock"));
        }

        let mgr = Arc::clone(mgr);
        let next_turn = Arc::clone(&next_turn);
        handles.push(tokio::spawn(async move {
            let granted = notify.wait_timeout(GRANT_TIMEOUT).await;
            let turn = next_turn.fetch_add(1, Ordering::SeqCst);
            if granted.is_some() {
                tokio::time::sleep(HOLD).await;
            }
            mgr.unlock(&request);
            (id, turn, granted)
        }));
    }

    tokio::time::sleep(HOLD).await;
    mgr.unlock(&holder);

    let mut out_of_order = 0;
    for handle in handles {
        let (id, turn, granted) = handle
            .await
            .map_err(|e| format!("async waiter panicked: {e}"))?;
        match granted {
            Some(result) => println!("waiter {id}: {result:?} on turn {turn}"),
            None => return Err(format!("waiter {id} timed out")),
        }
        if id != turn {
            out_of_order += 1;
        }
    }

    if out_of_order > 0 {
        return Err(format!("{out_of_order} of {tasks} waiters granted out of order"));
    }
    println!("async waiters: {tasks} granted in queue order");
    Ok(())
}
